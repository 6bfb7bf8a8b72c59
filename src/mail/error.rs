//! Typed errors for the pipeline's internal collaborators, following the
//! flat `thiserror` enum + `status()`/classification-helper convention used
//! by [`crate::auth::AuthError`] elsewhere in this codebase. Only the
//! `Account.last_error` string and the HTTP problem-details body are ever
//! stringly typed; everything upstream of that boundary is a typed enum.

use thiserror::Error;

/// The §7 error taxonomy, shared by every component that talks to the
/// remote mailbox provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bearer invalid or revoked. Sync Runner clears resume fields.
    Authentication,
    /// Provider quota hit. Resume fields are preserved.
    RateLimit,
    /// Network/timeout failure. Resume fields are preserved.
    Network,
    /// Anything else. Resume fields are preserved.
    Unknown,
}

impl ErrorClass {
    /// Classify an HTTP response the way the Sync Runner classifies a
    /// failed fetch: 401/403 is an auth error, 429 (or quota-shaped body
    /// text) is a rate limit, everything else is unknown.
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 | 403 => ErrorClass::Authentication,
            429 => ErrorClass::RateLimit,
            _ if body.to_lowercase().contains("quota") => ErrorClass::RateLimit,
            _ => ErrorClass::Unknown,
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorClass::Authentication => "reconnect required",
            ErrorClass::RateLimit => "retry later",
            ErrorClass::Network => "retry",
            ErrorClass::Unknown => "an unexpected error occurred",
        }
    }

    /// Whether a Sync Runner should clear its resume cursor on this error.
    pub fn clears_resume(&self) -> bool {
        matches!(self, ErrorClass::Authentication)
    }
}

#[derive(Debug, Error)]
pub enum TokenBrokerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("stored secret could not be decrypted: {0}")]
    Decrypt(#[from] crate::secrets::SecretCipherError),
    #[error("account {0} has no credential on file")]
    MissingCredential(uuid::Uuid),
    #[error("token refresh request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token refresh rejected by provider (status {status}): {body}")]
    RefreshRejected { status: u16, body: String },
}

impl TokenBrokerError {
    pub fn classify(&self) -> ErrorClass {
        match self {
            TokenBrokerError::RefreshRejected { status, body } => {
                ErrorClass::from_status(*status, body)
            }
            TokenBrokerError::Http(err) if err.is_timeout() || err.is_connect() => {
                ErrorClass::Network
            }
            _ => ErrorClass::Authentication,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetcherError {
    #[error(transparent)]
    Token(#[from] TokenBrokerError),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("mailbox API returned status {status}: {body}")]
    ApiError { status: u16, body: String },
    #[error("response shape did not match the expected message/part schema: {0}")]
    UnexpectedShape(String),
}

impl FetcherError {
    pub fn classify(&self) -> ErrorClass {
        match self {
            FetcherError::Token(err) => err.classify(),
            FetcherError::Http(err) if err.is_timeout() => ErrorClass::Network,
            FetcherError::Http(_) => ErrorClass::Network,
            FetcherError::ApiError { status, body } => ErrorClass::from_status(*status, body),
            FetcherError::UnexpectedShape(_) => ErrorClass::Unknown,
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Fetch(#[from] FetcherError),
    #[error("incremental sync requested with no prior last_sync recorded")]
    MissingLastSync,
}

impl SyncError {
    pub fn classify(&self) -> ErrorClass {
        match self {
            SyncError::Database(_) => ErrorClass::Unknown,
            SyncError::Fetch(err) => err.classify(),
            SyncError::MissingLastSync => ErrorClass::Unknown,
        }
    }
}

#[derive(Debug, Error)]
pub enum LmClassifierError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("request timed out")]
    Timeout,
    #[error("authentication rejected by the language model endpoint")]
    AuthFailed,
    #[error("language model endpoint returned status {0}")]
    RetriableStatus(u16),
    #[error("response was not valid JSON even after repair: {0}")]
    InvalidJson(String),
    #[error("response failed schema validation: {0}")]
    Validation(String),
    #[error("the language model classifier is disabled (no API key configured)")]
    Disabled,
}

impl LmClassifierError {
    /// Whether this error warrants another attempt, per §4.6's retry policy.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            LmClassifierError::Timeout | LmClassifierError::RetriableStatus(429 | 500 | 503)
        )
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
