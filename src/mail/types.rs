//! Core data model: accounts, mail rows, and subscriptions. Mirrors the
//! `#[sqlx(type_name = "...", rename_all = "snake_case")]` enum idiom used
//! for background job bookkeeping, and the `FromRow` + `JsonSchema` DTO
//! convention used for every other persisted row in this codebase.

use chrono::{DateTime, NaiveDate, Utc};
use rocket_okapi::okapi::schemars::{self, JsonSchema};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "sync_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Completed,
    Error,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "processing_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Idle,
    Analyzing,
    Completed,
    Error,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "ai_provider", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AiProvider {
    Keywords,
    KeywordsFallback,
    Claude,
    Error,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "billing_cycle", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    Monthly,
    Yearly,
    Weekly,
    Quarterly,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "subscription_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
    Paused,
}

/// A bound mailbox. Mutated only by the Sync Runner, Process Runner, Token
/// Broker, and Supervisor.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
pub struct Account {
    pub id: Uuid,
    pub user_id: i32,
    pub credential_id: Uuid,
    pub mailbox_address: String,
    #[serde(skip_serializing)]
    pub encrypted_access_token: Option<Vec<u8>>,
    #[serde(skip_serializing)]
    pub encrypted_refresh_token: Option<Vec<u8>>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,

    pub sync_status: SyncStatus,
    pub processing_status: ProcessingStatus,

    pub total_emails: i32,
    pub processed_emails: i32,
    pub emails_to_analyze: i32,
    pub emails_analyzed: i32,
    pub subscriptions_found: i32,
    #[schemars(with = "f64")]
    pub ai_cost_total: Decimal,

    pub is_initial_sync_complete: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub last_page_token: String,
    pub last_processed_message_id: Option<String>,
    pub query_hash: String,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A stored OAuth client secret used to mint bearers. Encrypted at rest via
/// [`crate::secrets::SecretCipher`].
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
pub struct Credential {
    pub id: Uuid,
    pub user_id: i32,
    pub provider: String,
    pub client_id: String,
    #[serde(skip_serializing)]
    pub encrypted_client_secret: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// The persisted normalised form of a remote message. Unique on
/// `(account_id, remote_message_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
pub struct MailRow {
    pub id: Uuid,
    pub account_id: Uuid,
    pub remote_message_id: String,
    pub subject: String,
    pub sender_email: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub received_at: DateTime<Utc>,

    pub processed_at: Option<DateTime<Utc>>,
    pub is_subscription: Option<bool>,
    pub subscription_confidence: Option<f32>,
    pub extracted_data: Option<serde_json::Value>,
    pub ai_provider: Option<AiProvider>,
    pub ai_reasoning: Option<String>,
    pub analysis_attempts: i32,

    pub created_at: DateTime<Utc>,
}

/// A detected recurring charge. Unique on `(user_id, service_name, amount)`;
/// conflicting inserts are silently suppressed.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: i32,
    pub mail_row_id: Option<Uuid>,
    pub service_name: String,
    #[schemars(with = "f64")]
    pub amount: Decimal,
    pub currency: String,
    pub billing_cycle: BillingCycle,
    pub next_billing_date: Option<NaiveDate>,
    pub status: SubscriptionStatus,
    pub confidence_score: f32,
    pub user_verified: bool,
    pub first_detected: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub category_id: Option<i32>,
    pub notes: Option<String>,
}

/// The outcome of classifying one Mail Row, produced by either the keyword
/// stage alone or the keyword stage followed by an LM escalation.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub is_subscription: bool,
    pub confidence: f32,
    pub service_name: Option<String>,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub billing_cycle: Option<BillingCycle>,
    pub next_billing_date: Option<NaiveDate>,
    pub reasoning: String,
    pub provider: AiProvider,
    /// USD cost of this classification, 0 for keyword-only results.
    pub cost: Decimal,
}
