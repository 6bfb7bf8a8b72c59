//! Pipeline-wide configuration loaded once from the environment, following
//! the same `from_env` convention as [`crate::auth::AuthConfig`].

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Below this keyword confidence, the LM is not invoked.
    pub keyword_confidence_threshold: f32,
    /// Derived from LM API key presence, not read directly from the environment.
    pub lm_enabled: bool,
    /// Rows processed per Process Runner batch.
    pub processing_batch_size: i64,
    /// Sleep between batches/pages, in both sync and process phases.
    pub processing_delay_ms: u64,
    /// Initial-sync lookback window, in months.
    pub months_back: i64,
    pub lm_max_tokens: u32,
    pub lm_temperature: f32,
    pub lm_timeout_ms: u64,
    pub lm_retry_delays_ms: [u64; 3],
    pub lm_content_truncate_chars: usize,
    /// Refresh the bearer if its expiry is within this many milliseconds.
    pub token_refresh_buffer_ms: i64,
    /// Log-only marker for long-running processing runs.
    pub stale_processing_threshold_min: i64,

    /// Maximum page size used purely to count messages under a filter.
    pub count_page_size: i64,
    /// Page size used while actually fetching and persisting messages.
    pub fetch_page_size: i64,

    pub mailbox_api_base_url: String,
    pub token_endpoint_url: String,
    pub lm_endpoint_url: String,
    pub lm_model: String,
    pub lm_api_key: Option<String>,
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let lm_api_key = std::env::var("MAILBOX_LM_API_KEY").ok().filter(|k| !k.is_empty());
        let lm_enabled = lm_api_key.is_some();

        Self {
            keyword_confidence_threshold: env_f32("MAILBOX_KEYWORD_CONFIDENCE_THRESHOLD", 0.3),
            lm_enabled,
            processing_batch_size: env_i64("MAILBOX_PROCESSING_BATCH_SIZE", 50),
            processing_delay_ms: env_u64("MAILBOX_PROCESSING_DELAY_MS", 100),
            months_back: env_i64("MAILBOX_MONTHS_BACK", 12),
            lm_max_tokens: env_u64("MAILBOX_LM_MAX_TOKENS", 500) as u32,
            lm_temperature: env_f32("MAILBOX_LM_TEMPERATURE", 0.0),
            lm_timeout_ms: env_u64("MAILBOX_LM_TIMEOUT_MS", 15_000),
            lm_retry_delays_ms: [10_000, 30_000, 90_000],
            lm_content_truncate_chars: env_u64("MAILBOX_LM_CONTENT_TRUNCATE_CHARS", 4000) as usize,
            token_refresh_buffer_ms: env_i64("MAILBOX_TOKEN_REFRESH_BUFFER_MS", 300_000),
            stale_processing_threshold_min: env_i64("MAILBOX_STALE_PROCESSING_THRESHOLD_MIN", 30),

            count_page_size: 500,
            fetch_page_size: 100,

            mailbox_api_base_url: std::env::var("MAILBOX_API_BASE_URL")
                .unwrap_or_else(|_| "https://mail.example.com/api".to_string()),
            token_endpoint_url: std::env::var("MAILBOX_TOKEN_ENDPOINT_URL")
                .unwrap_or_else(|_| "https://mail.example.com/oauth/token".to_string()),
            lm_endpoint_url: std::env::var("MAILBOX_LM_ENDPOINT_URL")
                .unwrap_or_else(|_| "https://api.anthropic.com/v1/messages".to_string()),
            lm_model: std::env::var("MAILBOX_LM_MODEL")
                .unwrap_or_else(|_| "claude-3-haiku-20240307".to_string()),
            lm_api_key,
        }
    }
}

fn env_i64(name: &str, default: i64) -> i64 {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_f32(name: &str, default: f32) -> f32 {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
