//! LM Classifier: escalates an uncertain Mail Row to an external
//! language-model endpoint. Request dispatch, timeout, and retry/backoff
//! follow the same shape as a typical `reqwest`-based embeddings client;
//! unlike exponential backoff, the delays here are the three fixed
//! values the retry policy specifies.

use std::sync::OnceLock;
use std::time::Duration;

use chrono::NaiveDate;
use regex::Regex;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::{sleep, timeout};

use super::config::PipelineConfig;
use super::error::LmClassifierError;
use super::types::{AiProvider, BillingCycle, ClassificationResult, MailRow};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_ATTEMPTS: usize = 3;

const PROMPT_TEMPLATE: &str = "You are a subscription-billing classifier. Given an email, decide \
whether it documents a recurring subscription charge.\n\n\
Subject: {subject}\n\
Sender: {sender}\n\
Date: {date}\n\
Body:\n{body}\n\n\
Respond with a single JSON object with exactly these keys: \
is_subscription (boolean), confidence (number 0-1), service_name (string or null), \
amount (number or null), currency (string or null), billing_cycle (one of \"monthly\", \
\"yearly\", \"weekly\", \"quarterly\", or null), next_billing_date (string YYYY-MM-DD or null), \
reasoning (short string). Respond with JSON only, no commentary.";

#[derive(Clone)]
pub struct LmClassifier {
    http: Client,
    endpoint_url: String,
    model: String,
    api_key: Option<String>,
    max_tokens: u32,
    temperature: f32,
    retry_delays_ms: [u64; 3],
    content_truncate_chars: usize,
}

impl LmClassifier {
    pub fn new(http: Client, config: &PipelineConfig) -> Self {
        Self {
            http,
            endpoint_url: config.lm_endpoint_url.clone(),
            model: config.lm_model.clone(),
            api_key: config.lm_api_key.clone(),
            max_tokens: config.lm_max_tokens,
            temperature: config.lm_temperature,
            retry_delays_ms: config.lm_retry_delays_ms,
            content_truncate_chars: config.lm_content_truncate_chars,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// Classifies `row`, retrying per §4.6's fixed-delay policy. Callers
    /// must check [`Self::is_enabled`] first; calling this while disabled
    /// always fails with [`LmClassifierError::Disabled`].
    pub async fn classify(&self, row: &MailRow) -> Result<ClassificationResult, LmClassifierError> {
        let Some(api_key) = &self.api_key else {
            return Err(LmClassifierError::Disabled);
        };

        let body = prepare_body(row.body_text.as_deref(), row.body_html.as_deref(), self.content_truncate_chars);
        let prompt = PROMPT_TEMPLATE
            .replace("{subject}", &row.subject)
            .replace("{sender}", &row.sender_email)
            .replace("{date}", &row.received_at.to_rfc3339())
            .replace("{body}", &body);

        let mut last_err = None;
        for attempt in 1..=MAX_ATTEMPTS {
            log::debug!("lm classifier: attempt {} of {}", attempt, MAX_ATTEMPTS);
            match timeout(REQUEST_TIMEOUT, self.dispatch(api_key, &prompt)).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(err)) => {
                    if !err.is_retriable() || attempt == MAX_ATTEMPTS {
                        return Err(err);
                    }
                    last_err = Some(err);
                }
                Err(_) => {
                    if attempt == MAX_ATTEMPTS {
                        return Err(LmClassifierError::Timeout);
                    }
                    last_err = Some(LmClassifierError::Timeout);
                }
            }

            let delay_ms = self.retry_delays_ms[attempt - 1];
            log::warn!("lm classifier: retrying in {}ms after attempt {}", delay_ms, attempt);
            sleep(Duration::from_millis(delay_ms)).await;
        }

        Err(last_err.unwrap_or(LmClassifierError::Timeout))
    }

    async fn dispatch(&self, api_key: &str, prompt: &str) -> Result<ClassificationResult, LmClassifierError> {
        #[derive(Serialize)]
        struct Message<'a> {
            role: &'a str,
            content: &'a str,
        }

        #[derive(Serialize)]
        struct Request<'a> {
            model: &'a str,
            max_tokens: u32,
            temperature: f32,
            messages: [Message<'a>; 1],
        }

        let request = Request {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            messages: [Message { role: "user", content: prompt }],
        };

        let response = self
            .http
            .post(&self.endpoint_url)
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(LmClassifierError::AuthFailed);
        }
        if !status.is_success() {
            return Err(LmClassifierError::RetriableStatus(status.as_u16()));
        }

        let parsed: AnthropicResponse = response.json().await?;
        let text = parsed
            .content
            .first()
            .map(|block| block.text.as_str())
            .unwrap_or_default();

        let answer = parse_answer(text)?;
        let input_tokens = parsed.usage.input_tokens;
        let output_tokens = parsed.usage.output_tokens;
        let cost = compute_cost(input_tokens, output_tokens);

        Ok(ClassificationResult {
            is_subscription: answer.is_subscription,
            confidence: answer.confidence,
            service_name: answer.service_name,
            amount: answer.amount,
            currency: answer.currency,
            billing_cycle: answer.billing_cycle,
            next_billing_date: answer.next_billing_date,
            reasoning: answer.reasoning,
            provider: AiProvider::Claude,
            cost,
        })
    }
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: String,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

struct LmAnswer {
    is_subscription: bool,
    confidence: f32,
    service_name: Option<String>,
    amount: Option<Decimal>,
    currency: Option<String>,
    billing_cycle: Option<BillingCycle>,
    next_billing_date: Option<NaiveDate>,
    reasoning: String,
}

static DATE_REGEX: OnceLock<Regex> = OnceLock::new();

fn date_regex() -> &'static Regex {
    DATE_REGEX.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("invalid date regex"))
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn repair_json(text: &str) -> String {
    let mut repaired = text.trim_end().trim_end_matches(',').to_string();
    let opens = repaired.matches('{').count();
    let closes = repaired.matches('}').count();
    for _ in closes..opens {
        repaired.push('}');
    }
    repaired
}

fn parse_answer(raw: &str) -> Result<LmAnswer, LmClassifierError> {
    let candidate = strip_code_fence(raw);
    let value: Value = match serde_json::from_str(candidate) {
        Ok(value) => value,
        Err(_) => {
            let repaired = repair_json(candidate);
            serde_json::from_str(&repaired)
                .map_err(|err| LmClassifierError::InvalidJson(err.to_string()))?
        }
    };

    let is_subscription = value
        .get("is_subscription")
        .and_then(Value::as_bool)
        .ok_or_else(|| LmClassifierError::Validation("is_subscription missing or not a bool".to_string()))?;

    let confidence = value
        .get("confidence")
        .and_then(Value::as_f64)
        .ok_or_else(|| LmClassifierError::Validation("confidence missing or not a number".to_string()))?
        as f32;
    if !(0.0..=1.0).contains(&confidence) {
        return Err(LmClassifierError::Validation(format!("confidence {} out of [0,1]", confidence)));
    }

    let service_name = value.get("service_name").and_then(Value::as_str).map(str::to_string);
    let currency = value.get("currency").and_then(Value::as_str).map(str::to_string);

    let amount = match value.get("amount") {
        None | Some(Value::Null) => None,
        Some(v) => Some(
            v.as_f64()
                .and_then(|f| Decimal::try_from(f).ok())
                .ok_or_else(|| LmClassifierError::Validation("amount is not a number".to_string()))?,
        ),
    };

    let billing_cycle = match value.get("billing_cycle") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(match s.as_str() {
            "monthly" => BillingCycle::Monthly,
            "yearly" => BillingCycle::Yearly,
            "weekly" => BillingCycle::Weekly,
            "quarterly" => BillingCycle::Quarterly,
            other => return Err(LmClassifierError::Validation(format!("unknown billing_cycle `{}`", other))),
        }),
        Some(_) => return Err(LmClassifierError::Validation("billing_cycle is not a string".to_string())),
    };

    let next_billing_date = match value.get("next_billing_date") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => {
            if !date_regex().is_match(s) {
                return Err(LmClassifierError::Validation(format!(
                    "next_billing_date `{}` is not YYYY-MM-DD",
                    s
                )));
            }
            Some(
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .map_err(|err| LmClassifierError::Validation(err.to_string()))?,
            )
        }
        Some(_) => return Err(LmClassifierError::Validation("next_billing_date is not a string".to_string())),
    };

    let reasoning = value
        .get("reasoning")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(LmAnswer {
        is_subscription,
        confidence,
        service_name,
        amount,
        currency,
        billing_cycle,
        next_billing_date,
        reasoning,
    })
}

/// Rounds `input/1e6 × $0.25 + output/1e6 × $1.25` to 6 decimal places USD.
fn compute_cost(input_tokens: u64, output_tokens: u64) -> Decimal {
    let input_cost = Decimal::from(input_tokens) / dec!(1_000_000) * dec!(0.25);
    let output_cost = Decimal::from(output_tokens) / dec!(1_000_000) * dec!(1.25);
    (input_cost + output_cost).round_dp(6)
}

/// Prefers the plain-text body; otherwise strips HTML down to text and
/// truncates to `max_chars` with an explicit marker.
fn prepare_body(body_text: Option<&str>, body_html: Option<&str>, max_chars: usize) -> String {
    let text = match body_text {
        Some(text) if !text.trim().is_empty() => text.to_string(),
        _ => strip_html(body_html.unwrap_or_default()),
    };
    truncate(&text, max_chars)
}

static TAG_REGEX: OnceLock<Regex> = OnceLock::new();
static SCRIPT_STYLE_REGEX: OnceLock<Regex> = OnceLock::new();
static BREAK_TAG_REGEX: OnceLock<Regex> = OnceLock::new();
static BLANK_RUN_REGEX: OnceLock<Regex> = OnceLock::new();

fn strip_html(html: &str) -> String {
    let script_style = SCRIPT_STYLE_REGEX.get_or_init(|| {
        Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</\1>").expect("invalid script/style regex")
    });
    let without_scripts = script_style.replace_all(html, "");

    let break_tag = BREAK_TAG_REGEX.get_or_init(|| {
        Regex::new(r"(?i)<(br\s*/?|/p|/div|/h[1-6])>").expect("invalid break-tag regex")
    });
    let with_breaks = break_tag.replace_all(&without_scripts, "\n");

    let tag_regex = TAG_REGEX.get_or_init(|| Regex::new(r"<[^>]+>").expect("invalid tag regex"));
    let without_tags = tag_regex.replace_all(&with_breaks, "");

    let decoded = without_tags
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");

    let blank_run = BLANK_RUN_REGEX.get_or_init(|| Regex::new(r"\n{3,}").expect("invalid blank-run regex"));
    blank_run.replace_all(&decoded, "\n\n").trim().to_string()
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{}\n[... truncated ...]", truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_fence_markers_are_stripped() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn trailing_commas_and_unbalanced_braces_are_repaired() {
        let repaired = repair_json("{\"a\":1,");
        assert_eq!(repaired, "{\"a\":1}");
    }

    #[test]
    fn a_well_formed_answer_parses_and_validates() {
        let raw = r#"{"is_subscription":true,"confidence":0.9,"service_name":"Spotify","amount":9.99,
            "currency":"USD","billing_cycle":"monthly","next_billing_date":"2026-08-01","reasoning":"receipt"}"#;
        let answer = parse_answer(raw).unwrap();
        assert!(answer.is_subscription);
        assert_eq!(answer.service_name.as_deref(), Some("Spotify"));
        assert_eq!(answer.billing_cycle, Some(BillingCycle::Monthly));
    }

    #[test]
    fn out_of_range_confidence_fails_validation() {
        let raw = r#"{"is_subscription":true,"confidence":1.5,"reasoning":"bad"}"#;
        assert!(matches!(parse_answer(raw), Err(LmClassifierError::Validation(_))));
    }

    #[test]
    fn malformed_next_billing_date_fails_validation() {
        let raw = r#"{"is_subscription":true,"confidence":0.5,"next_billing_date":"08/01/2026","reasoning":"x"}"#;
        assert!(matches!(parse_answer(raw), Err(LmClassifierError::Validation(_))));
    }

    #[test]
    fn html_stripping_keeps_text_and_collapses_blank_runs() {
        let html = "<html><head><style>body{color:red}</style></head><body><p>Hello</p><br><div>World &amp; friends</div></body></html>";
        let text = strip_html(html);
        assert!(text.contains("Hello"));
        assert!(text.contains("World & friends"));
        assert!(!text.contains("color:red"));
        assert!(!text.contains('<'));
    }

    #[test]
    fn cost_formula_matches_the_documented_rates() {
        let cost = compute_cost(1_000_000, 1_000_000);
        assert_eq!(cost, dec!(1.5));
    }

    #[test]
    fn long_bodies_are_truncated_with_a_marker() {
        let long = "a".repeat(5000);
        let truncated = truncate(&long, 4000);
        assert!(truncated.ends_with("[... truncated ...]"));
        assert_eq!(truncated.chars().count(), 4000 + "\n[... truncated ...]".chars().count());
    }
}
