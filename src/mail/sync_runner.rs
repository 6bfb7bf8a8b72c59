//! Sync Runner: drives the sync-phase state machine for a single Account —
//! one struct owning the collaborators, a public entry point, private phase
//! methods that log their own entry and exit, and top-level errors turned
//! into a store `fail_*` call before propagating.

use std::time::Duration;

use uuid::Uuid;

use super::config::PipelineConfig;
use super::error::SyncError;
use super::fetcher::MailFetcher;
use super::query_builder::build_query;
use super::store::MailStore;

pub struct SyncRunner {
    store: MailStore,
    fetcher: MailFetcher,
    config: PipelineConfig,
}

impl SyncRunner {
    pub fn new(store: MailStore, fetcher: MailFetcher, config: PipelineConfig) -> Self {
        Self { store, fetcher, config }
    }

    /// Runs (or resumes) a sync for `account_id` to completion. On failure
    /// the Account's `sync_status`/`last_error` are already written before
    /// the error is returned to the caller.
    pub async fn run(&self, account_id: Uuid) -> Result<(), SyncError> {
        match self.run_inner(account_id).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let class = err.classify();
                log::warn!("sync failed for account {}: {} ({:?})", account_id, err, class);
                self.store
                    .fail_sync(account_id, class.user_message(), class.clears_resume())
                    .await?;
                Err(err)
            }
        }
    }

    async fn run_inner(&self, account_id: Uuid) -> Result<(), SyncError> {
        let account = self.store.get_account(account_id).await?;
        let is_initial = !account.is_initial_sync_complete;
        let (filter, fingerprint) = build_query(self.config.months_back, account.last_sync, is_initial)?;

        let decision = self.store.resume_decision(&account, &fingerprint).await?;

        let (start_page_token, start_processed, last_processed_message_id) = if decision.resume {
            log::info!("resuming sync for account {} at page token", account_id);
            (
                decision.start_page_token,
                decision.start_processed,
                account.last_processed_message_id.clone().unwrap_or_default(),
            )
        } else {
            self.store.initialize_sync(account_id, &fingerprint).await?;
            self.count_phase(account_id, &filter).await?;
            (String::new(), 0, String::new())
        };

        self.fetch_phase(account_id, &filter, start_page_token, start_processed, last_processed_message_id)
            .await?;

        self.store.complete_sync(account_id, is_initial).await?;
        Ok(())
    }

    /// §4.4 step 3: count total IDs under the filter with the wide page
    /// size, skipped entirely on resume.
    async fn count_phase(&self, account_id: Uuid, filter: &str) -> Result<(), SyncError> {
        log::debug!("count phase starting for account {}", account_id);
        let mut total = 0i64;
        let mut token = String::new();
        loop {
            let page = self
                .fetcher
                .list_page(
                    account_id,
                    filter,
                    if token.is_empty() { None } else { Some(token.as_str()) },
                    self.config.count_page_size as u32,
                )
                .await
                .map_err(SyncError::Fetch)?;
            total += page.message_ids.len() as i64;
            if page.next_page_token.is_empty() {
                break;
            }
            token = page.next_page_token;
        }
        self.store.set_total_emails(account_id, total).await?;
        log::debug!("count phase found {} messages for account {}", total, account_id);
        Ok(())
    }

    /// §4.4 step 4: page through the filter, fetching and upserting every
    /// message, writing the cursor back after each fully-drained page.
    async fn fetch_phase(
        &self,
        account_id: Uuid,
        filter: &str,
        mut page_token: String,
        mut processed: i32,
        mut last_processed_message_id: String,
    ) -> Result<(), SyncError> {
        loop {
            let page = self
                .fetcher
                .list_page(
                    account_id,
                    filter,
                    if page_token.is_empty() { None } else { Some(page_token.as_str()) },
                    self.config.fetch_page_size as u32,
                )
                .await
                .map_err(SyncError::Fetch)?;

            let mut skipped = 0u32;
            for message_id in &page.message_ids {
                match self.fetcher.fetch_message(account_id, message_id).await {
                    Ok(message) => {
                        self.store
                            .upsert_mail_row(
                                account_id,
                                &message.remote_message_id,
                                &message.subject,
                                &message.sender_email,
                                message.body_text.as_deref(),
                                message.body_html.as_deref(),
                                message.received_at,
                            )
                            .await?;
                        processed += 1;
                        last_processed_message_id = message.remote_message_id;
                    }
                    Err(err) => {
                        skipped += 1;
                        log::warn!("skipping message {} for account {}: {}", message_id, account_id, err);
                    }
                }
            }
            if skipped > 0 {
                log::info!("skipped {} messages this page for account {}", skipped, account_id);
            }

            let next_page_token = page.next_page_token;
            if let Err(err) = self
                .store
                .save_sync_progress(account_id, processed, &next_page_token, &last_processed_message_id)
                .await
            {
                log::warn!("cursor write failed for account {}, retrying once: {}", account_id, err);
                if let Err(err) = self
                    .store
                    .save_sync_progress(account_id, processed, &next_page_token, &last_processed_message_id)
                    .await
                {
                    log::error!(
                        "cursor write failed twice for account {}, continuing without it: {}",
                        account_id,
                        err
                    );
                }
            }

            if next_page_token.is_empty() {
                break;
            }
            page_token = next_page_token;
            tokio::time::sleep(Duration::from_millis(self.config.processing_delay_ms)).await;
        }
        Ok(())
    }
}
