//! Data transfer objects exposed by the API.
//!
//! Every struct in this module derives `JsonSchema` so `rocket_okapi` can describe
//! the payloads accurately in the generated OpenAPI document.

use chrono::{DateTime, NaiveDate, Utc};
use rocket_okapi::okapi::schemars::{self, JsonSchema};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::mail::types::{Account, BillingCycle, ProcessingStatus, Subscription, SyncStatus};

/// Pagination metadata accompanying list responses.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PageMetadata {
    /// One-based page index.
    pub page: i64,
    /// Page size.
    pub size: i64,
    /// Total number of pages.
    #[serde(rename = "totalPages")]
    pub total_pages: i64,
    /// Total number of matching records.
    #[serde(rename = "totalElements")]
    pub total_elements: i64,
}

/// Wrapper for paginated datasets.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PaginatedResponse<T> {
    /// Page content.
    pub data: Vec<T>,
    /// Associated pagination metadata.
    pub page: PageMetadata,
}

impl<T> PaginatedResponse<T> {
    /// Create a paginated response and compute pagination totals.
    pub fn new(data: Vec<T>, page: i64, size: i64, total_elements: i64) -> Self {
        let total_pages = if size > 0 {
            (total_elements + size - 1) / size
        } else {
            0
        };

        Self {
            data,
            page: PageMetadata {
                page,
                size,
                total_pages,
                total_elements,
            },
        }
    }
}

/// Generic wrapper used by endpoints that return simple collections.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DataResponse<T> {
    /// Response payload.
    pub data: T,
}

impl<T> DataResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

/// Account summary returned to the owning user. Encrypted token columns
/// are never included.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AccountSummary {
    pub id: uuid::Uuid,
    pub mailbox_address: String,
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
    pub last_error: Option<String>,
}

impl From<Account> for AccountSummary {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            mailbox_address: account.mailbox_address,
            is_active: account.is_active,
            sync_status: account.sync_status,
            processing_status: account.processing_status,
            total_emails: account.total_emails,
            processed_emails: account.processed_emails,
            emails_to_analyze: account.emails_to_analyze,
            emails_analyzed: account.emails_analyzed,
            subscriptions_found: account.subscriptions_found,
            ai_cost_total: account.ai_cost_total,
            is_initial_sync_complete: account.is_initial_sync_complete,
            last_sync: account.last_sync,
            last_error: account.last_error,
        }
    }
}

/// A detected recurring charge, as returned to the owning user.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SubscriptionSummary {
    pub id: uuid::Uuid,
    pub service_name: String,
    #[schemars(with = "f64")]
    pub amount: Decimal,
    pub currency: String,
    pub billing_cycle: BillingCycle,
    pub next_billing_date: Option<NaiveDate>,
    pub confidence_score: f32,
    pub user_verified: bool,
    pub first_detected: DateTime<Utc>,
}

impl From<Subscription> for SubscriptionSummary {
    fn from(subscription: Subscription) -> Self {
        Self {
            id: subscription.id,
            service_name: subscription.service_name,
            amount: subscription.amount,
            currency: subscription.currency,
            billing_cycle: subscription.billing_cycle,
            next_billing_date: subscription.next_billing_date,
            confidence_score: subscription.confidence_score,
            user_verified: subscription.user_verified,
            first_detected: subscription.first_detected,
        }
    }
}

/// Response to a `StartSync`/`StartProcessing` request: the run has been
/// dispatched, not that it has completed.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunAccepted {
    pub account_id: uuid::Uuid,
    pub accepted: bool,
}
