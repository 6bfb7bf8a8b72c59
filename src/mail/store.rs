//! Mail Store: persists mailbox artifacts, sync/process counters, and
//! resume cursors under transactional guarantees. Structured the way
//! `sync::queue::JobQueue` wraps a `PgPool` behind a small set of named
//! operations rather than exposing raw SQL to callers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use super::types::{Account, AiProvider, MailRow, ProcessingStatus, Subscription, SyncStatus};

#[derive(Clone)]
pub struct MailStore {
    pool: PgPool,
}

/// What the Sync Runner's resume decision (§4.4 step 1) found.
pub struct ResumeDecision {
    pub resume: bool,
    pub start_page_token: String,
    pub start_processed: i32,
}

impl MailStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn get_account(&self, account_id: Uuid) -> Result<Account, sqlx::Error> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1")
            .bind(account_id)
            .fetch_one(&self.pool)
            .await
    }

    /// §4.8 `ResumeInterrupted`: accounts whose runner died mid-flight.
    pub async fn accounts_needing_resume(&self) -> Result<Vec<Account>, sqlx::Error> {
        sqlx::query_as::<_, Account>(
            "SELECT * FROM accounts WHERE sync_status = 'syncing' OR processing_status = 'analyzing'",
        )
        .fetch_all(&self.pool)
        .await
    }

    /// Advisory at-most-one guard (§5): flips `pending`/`completed`/`error`
    /// to `syncing` in one statement and reports whether this caller won
    /// the race. Not a mutex — two concurrent callers may both observe
    /// `pending` and both proceed; that is accepted per the design.
    pub async fn try_claim_sync(&self, account_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE accounts SET sync_status = 'syncing', updated_at = now()
             WHERE id = $1 AND sync_status != 'syncing'",
        )
        .bind(account_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn try_claim_processing(&self, account_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE accounts SET processing_status = 'analyzing', updated_at = now()
             WHERE id = $1 AND processing_status != 'analyzing'",
        )
        .bind(account_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// §4.4 step 1: resume decision. Clears resume fields on a fingerprint
    /// mismatch; otherwise reports whether to resume and from where.
    pub async fn resume_decision(
        &self,
        account: &Account,
        current_fingerprint: &str,
    ) -> Result<ResumeDecision, sqlx::Error> {
        if account.sync_status == SyncStatus::Syncing
            && !account.last_page_token.is_empty()
            && account.query_hash == current_fingerprint
        {
            return Ok(ResumeDecision {
                resume: true,
                start_page_token: account.last_page_token.clone(),
                start_processed: account.processed_emails,
            });
        }

        if account.query_hash != current_fingerprint {
            sqlx::query(
                "UPDATE accounts SET last_page_token = '', last_processed_message_id = NULL
                 WHERE id = $1",
            )
            .bind(account.id)
            .execute(&self.pool)
            .await?;
        }

        Ok(ResumeDecision {
            resume: false,
            start_page_token: String::new(),
            start_processed: 0,
        })
    }

    /// §4.4 step 2: initialise a from-scratch sync run.
    pub async fn initialize_sync(
        &self,
        account_id: Uuid,
        query_hash: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE accounts SET
                total_emails = 0,
                processed_emails = 0,
                last_page_token = '',
                last_processed_message_id = NULL,
                query_hash = $2,
                processing_started_at = now(),
                last_error = NULL,
                updated_at = now()
             WHERE id = $1",
        )
        .bind(account_id)
        .bind(query_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_total_emails(&self, account_id: Uuid, total: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE accounts SET total_emails = $2, updated_at = now() WHERE id = $1")
            .bind(account_id)
            .bind(total as i32)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// §4.4 step 4: atomic cursor write after a fully-drained page. Callers
    /// retry this once on failure per §7; a second failure is logged and
    /// the run continues.
    pub async fn save_sync_progress(
        &self,
        account_id: Uuid,
        processed_emails: i32,
        next_page_token: &str,
        last_processed_message_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE accounts SET
                processed_emails = $2,
                last_page_token = $3,
                last_processed_message_id = $4,
                updated_at = now()
             WHERE id = $1",
        )
        .bind(account_id)
        .bind(processed_emails)
        .bind(next_page_token)
        .bind(last_processed_message_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// §4.4 step 5: completion. `mark_initial_complete` should be true iff
    /// this run was the account's initial sync.
    pub async fn complete_sync(
        &self,
        account_id: Uuid,
        mark_initial_complete: bool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE accounts SET
                sync_status = 'completed',
                last_page_token = '',
                last_processed_message_id = NULL,
                is_initial_sync_complete = is_initial_sync_complete OR $2,
                last_sync = now(),
                updated_at = now()
             WHERE id = $1",
        )
        .bind(account_id)
        .bind(mark_initial_complete)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn fail_sync(
        &self,
        account_id: Uuid,
        message: &str,
        clear_resume: bool,
    ) -> Result<(), sqlx::Error> {
        if clear_resume {
            sqlx::query(
                "UPDATE accounts SET
                    sync_status = 'error',
                    last_error = $2,
                    last_page_token = '',
                    last_processed_message_id = NULL,
                    updated_at = now()
                 WHERE id = $1",
            )
            .bind(account_id)
            .bind(message)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                "UPDATE accounts SET sync_status = 'error', last_error = $2, updated_at = now()
                 WHERE id = $1",
            )
            .bind(account_id)
            .bind(message)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// §4.3 persistence: upsert on `(account_id, remote_message_id)` with
    /// overwrite of headers and bodies.
    pub async fn upsert_mail_row(
        &self,
        account_id: Uuid,
        remote_message_id: &str,
        subject: &str,
        sender_email: &str,
        body_text: Option<&str>,
        body_html: Option<&str>,
        received_at: DateTime<Utc>,
    ) -> Result<Uuid, sqlx::Error> {
        sqlx::query_scalar(
            "INSERT INTO mail_rows
                (id, account_id, remote_message_id, subject, sender_email, body_text, body_html, received_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (account_id, remote_message_id) DO UPDATE SET
                subject = EXCLUDED.subject,
                sender_email = EXCLUDED.sender_email,
                body_text = EXCLUDED.body_text,
                body_html = EXCLUDED.body_html,
                received_at = EXCLUDED.received_at
             RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(account_id)
        .bind(remote_message_id)
        .bind(subject)
        .bind(sender_email)
        .bind(body_text)
        .bind(body_html)
        .bind(received_at)
        .fetch_one(&self.pool)
        .await
    }

    // --- Process Runner support -------------------------------------------------

    pub async fn count_unprocessed(&self, account_id: Uuid) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT count(*) FROM mail_rows WHERE account_id = $1 AND processed_at IS NULL",
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn next_unprocessed_batch(
        &self,
        account_id: Uuid,
        limit: i64,
    ) -> Result<Vec<MailRow>, sqlx::Error> {
        sqlx::query_as::<_, MailRow>(
            "SELECT * FROM mail_rows
             WHERE account_id = $1 AND processed_at IS NULL
             ORDER BY received_at DESC
             LIMIT $2",
        )
        .bind(account_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    /// §4.7 step 2: resume decision, or a fresh count-and-zero.
    pub async fn begin_or_resume_processing(
        &self,
        account: &Account,
    ) -> Result<i64, sqlx::Error> {
        let resuming = matches!(
            account.processing_status,
            ProcessingStatus::Analyzing | ProcessingStatus::Error
        ) && account.emails_analyzed < account.emails_to_analyze;

        if resuming {
            return Ok((account.emails_to_analyze - account.emails_analyzed) as i64);
        }

        let unprocessed = self.count_unprocessed(account.id).await?;
        sqlx::query(
            "UPDATE accounts SET
                processing_status = 'analyzing',
                emails_to_analyze = $2,
                emails_analyzed = 0,
                subscriptions_found = 0,
                processing_started_at = now(),
                last_error = NULL,
                updated_at = now()
             WHERE id = $1",
        )
        .bind(account.id)
        .bind(unprocessed as i32)
        .execute(&self.pool)
        .await?;
        Ok(unprocessed)
    }

    pub async fn mark_mail_row_processed(
        &self,
        mail_row_id: Uuid,
        is_subscription: bool,
        confidence: f32,
        extracted_data: Option<serde_json::Value>,
        provider: AiProvider,
        reasoning: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE mail_rows SET
                processed_at = now(),
                is_subscription = $2,
                subscription_confidence = $3,
                extracted_data = $4,
                ai_provider = $5,
                ai_reasoning = $6
             WHERE id = $1",
        )
        .bind(mail_row_id)
        .bind(is_subscription)
        .bind(confidence)
        .bind(extracted_data)
        .bind(provider)
        .bind(reasoning)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn increment_analysis_attempts(&self, mail_row_id: Uuid) -> Result<i32, sqlx::Error> {
        sqlx::query_scalar(
            "UPDATE mail_rows SET analysis_attempts = analysis_attempts + 1
             WHERE id = $1 RETURNING analysis_attempts",
        )
        .bind(mail_row_id)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn advance_process_batch(
        &self,
        account_id: Uuid,
        analyzed_delta: i32,
        subscriptions_delta: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE accounts SET
                emails_analyzed = emails_analyzed + $2,
                subscriptions_found = subscriptions_found + $3,
                updated_at = now()
             WHERE id = $1",
        )
        .bind(account_id)
        .bind(analyzed_delta)
        .bind(subscriptions_delta)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn add_ai_cost(&self, account_id: Uuid, cost: Decimal) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE accounts SET ai_cost_total = ai_cost_total + $2, updated_at = now() WHERE id = $1",
        )
        .bind(account_id)
        .bind(cost)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn complete_processing(&self, account_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE accounts SET
                processing_status = 'completed',
                processing_started_at = NULL,
                updated_at = now()
             WHERE id = $1",
        )
        .bind(account_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn fail_processing(&self, account_id: Uuid, message: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE accounts SET processing_status = 'error', last_error = $2, updated_at = now()
             WHERE id = $1",
        )
        .bind(account_id)
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Upsert on `(user_id, service_name, amount)` — `DO NOTHING`. Returns
    /// the new row only if one was actually inserted, so callers can tell
    /// a fresh detection from a suppressed duplicate (§3, scenario 6).
    pub async fn upsert_subscription(
        &self,
        user_id: i32,
        mail_row_id: Option<Uuid>,
        service_name: &str,
        amount: Decimal,
        currency: &str,
        billing_cycle: super::types::BillingCycle,
        next_billing_date: Option<chrono::NaiveDate>,
        confidence_score: f32,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        sqlx::query_as::<_, Subscription>(
            "INSERT INTO subscriptions
                (id, user_id, mail_row_id, service_name, amount, currency, billing_cycle,
                 next_billing_date, confidence_score)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (user_id, service_name, amount) DO NOTHING
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(mail_row_id)
        .bind(service_name)
        .bind(amount)
        .bind(currency)
        .bind(billing_cycle)
        .bind(next_billing_date)
        .bind(confidence_score)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn list_subscriptions_for_user(
        &self,
        user_id: i32,
    ) -> Result<Vec<Subscription>, sqlx::Error> {
        sqlx::query_as::<_, Subscription>(
            "SELECT * FROM subscriptions WHERE user_id = $1 ORDER BY first_detected DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }
}
