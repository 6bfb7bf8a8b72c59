//! Process Runner: drives the process-phase state machine for a single
//! Account — batching unprocessed Mail Rows through the hybrid classifier
//! and upserting Subscriptions. Structural shape mirrors
//! [`crate::mail::sync_runner::SyncRunner`].

use std::time::Duration;

use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

use super::config::PipelineConfig;
use super::error::ProcessError;
use super::keyword_classifier;
use super::lm_classifier::LmClassifier;
use super::store::MailStore;
use super::types::{Account, AiProvider, ClassificationResult, MailRow};

pub struct ProcessRunner {
    store: MailStore,
    lm_classifier: LmClassifier,
    config: PipelineConfig,
}

struct RowOutcome {
    /// Whether this row consumed a slot in this batch's `emails_analyzed`
    /// increment — false means it was left unprocessed for the next visit.
    counted: bool,
    subscription_added: bool,
}

impl ProcessRunner {
    pub fn new(store: MailStore, lm_classifier: LmClassifier, config: PipelineConfig) -> Self {
        Self { store, lm_classifier, config }
    }

    /// Runs (or resumes) processing for `account_id` to completion. On
    /// failure the Account's `processing_status`/`last_error` are already
    /// written before the error is returned.
    pub async fn run(&self, account_id: Uuid) -> Result<(), ProcessError> {
        match self.run_inner(account_id).await {
            Ok(()) => Ok(()),
            Err(err) => {
                log::warn!("processing failed for account {}: {}", account_id, err);
                self.store.fail_processing(account_id, &err.to_string()).await?;
                Err(err)
            }
        }
    }

    async fn run_inner(&self, account_id: Uuid) -> Result<(), ProcessError> {
        let account = self.store.get_account(account_id).await?;
        let total_to_analyze = self.store.begin_or_resume_processing(&account).await?;
        if total_to_analyze == 0 {
            self.store.complete_processing(account_id).await?;
            return Ok(());
        }

        loop {
            let batch = self
                .store
                .next_unprocessed_batch(account_id, self.config.processing_batch_size)
                .await?;
            if batch.is_empty() {
                self.store.complete_processing(account_id).await?;
                break;
            }

            let mut analyzed_delta = 0i32;
            let mut subscriptions_delta = 0i32;

            for row in &batch {
                let outcome = self.process_row(&account, row).await?;
                if outcome.counted {
                    analyzed_delta += 1;
                }
                if outcome.subscription_added {
                    subscriptions_delta += 1;
                }
            }

            self.store
                .advance_process_batch(account_id, analyzed_delta, subscriptions_delta)
                .await?;
            tokio::time::sleep(Duration::from_millis(self.config.processing_delay_ms)).await;
        }

        Ok(())
    }

    async fn process_row(&self, account: &Account, row: &MailRow) -> Result<RowOutcome, ProcessError> {
        match self.classify_and_persist(account, row).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                let attempts = self.store.increment_analysis_attempts(row.id).await?;
                if attempts >= 3 {
                    let reasoning = format!("gave up after {} attempts: {}", attempts, err);
                    self.store
                        .mark_mail_row_processed(row.id, false, 0.0, None, AiProvider::Error, &reasoning)
                        .await?;
                    Ok(RowOutcome { counted: true, subscription_added: false })
                } else {
                    Ok(RowOutcome { counted: false, subscription_added: false })
                }
            }
        }
    }

    async fn classify_and_persist(&self, account: &Account, row: &MailRow) -> Result<RowOutcome, ProcessError> {
        let keyword_result = keyword_classifier::classify(row);

        let result = if keyword_result.confidence < self.config.keyword_confidence_threshold {
            keyword_result
        } else if self.lm_classifier.is_enabled() {
            match self.lm_classifier.classify(row).await {
                Ok(lm_result) => {
                    self.store.add_ai_cost(account.id, lm_result.cost).await?;
                    lm_result
                }
                Err(err) => {
                    log::warn!("lm classifier failed for row {}, falling back to keywords: {}", row.id, err);
                    fallback(keyword_result)
                }
            }
        } else {
            fallback(keyword_result)
        };

        let extracted_data = json!({
            "service_name": result.service_name,
            "amount": result.amount,
            "currency": result.currency,
            "billing_cycle": result.billing_cycle,
            "next_billing_date": result.next_billing_date,
        });

        self.store
            .mark_mail_row_processed(
                row.id,
                result.is_subscription,
                result.confidence,
                Some(extracted_data),
                result.provider,
                &result.reasoning,
            )
            .await?;

        let mut subscription_added = false;
        if result.is_subscription {
            if let (Some(service_name), Some(amount)) = (&result.service_name, result.amount) {
                let billing_cycle = result.billing_cycle.unwrap_or(super::types::BillingCycle::Monthly);
                let currency = result.currency.as_deref().unwrap_or("USD");
                let inserted = self
                    .store
                    .upsert_subscription(
                        account.user_id,
                        Some(row.id),
                        service_name,
                        amount,
                        currency,
                        billing_cycle,
                        result.next_billing_date,
                        result.confidence,
                    )
                    .await?;
                subscription_added = inserted.is_some();
            }
        }

        Ok(RowOutcome { counted: true, subscription_added })
    }
}

/// Rewrites a classification result as a `keywords_fallback` result with no
/// cost, used whenever the LM is disabled or its call fails.
fn fallback(keyword_result: ClassificationResult) -> ClassificationResult {
    ClassificationResult {
        provider: AiProvider::KeywordsFallback,
        cost: Decimal::ZERO,
        ..keyword_result
    }
}
