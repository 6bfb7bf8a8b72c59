//! Supervisor: the only public entry point for starting sync/process runs.
//! Enforces at-most-one-live-runner-per-phase via [`MailStore`]'s
//! conditional-`UPDATE` claim guards (§5: advisory, not a mutex), and
//! chains a successful sync into processing.

use std::sync::Arc;

use uuid::Uuid;

use super::process_runner::ProcessRunner;
use super::store::MailStore;
use super::sync_runner::SyncRunner;

#[derive(Clone)]
pub struct Supervisor {
    store: MailStore,
    sync_runner: Arc<SyncRunner>,
    process_runner: Arc<ProcessRunner>,
}

impl Supervisor {
    pub fn new(store: MailStore, sync_runner: SyncRunner, process_runner: ProcessRunner) -> Self {
        Self {
            store,
            sync_runner: Arc::new(sync_runner),
            process_runner: Arc::new(process_runner),
        }
    }

    /// Fire-and-forget. Refuses to start a second Sync Runner for the same
    /// Account; on success, chains into `StartProcessing`.
    pub fn start_sync(&self, account_id: Uuid) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            match supervisor.store.try_claim_sync(account_id).await {
                Ok(true) => supervisor.run_sync(account_id).await,
                Ok(false) => {
                    log::info!("sync already running for account {}, ignoring start request", account_id);
                }
                Err(err) => {
                    log::error!("failed to claim sync for account {}: {}", account_id, err);
                }
            }
        });
    }

    /// Fire-and-forget. Refuses to start a second Process Runner for the
    /// same Account.
    pub fn start_processing(&self, account_id: Uuid) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            match supervisor.store.try_claim_processing(account_id).await {
                Ok(true) => supervisor.run_processing(account_id).await,
                Ok(false) => {
                    log::info!("processing already running for account {}, ignoring start request", account_id);
                }
                Err(err) => {
                    log::error!("failed to claim processing for account {}: {}", account_id, err);
                }
            }
        });
    }

    /// Runs the sync runner for an account already in the `syncing`
    /// state — either because this caller just won the claim race, or
    /// because it's being resumed after a restart and was left `syncing`
    /// by the crashed prior run.
    async fn run_sync(&self, account_id: Uuid) {
        if self.sync_runner.run(account_id).await.is_ok() {
            self.start_processing(account_id);
        }
    }

    /// Runs the process runner for an account already in the `analyzing`
    /// state, by the same reasoning as [`Self::run_sync`].
    async fn run_processing(&self, account_id: Uuid) {
        if let Err(err) = self.process_runner.run(account_id).await {
            log::warn!("processing run for account {} returned an error: {}", account_id, err);
        }
    }

    /// Called exactly once at server start. Scans for accounts whose
    /// runner died mid-flight and restarts each in the background.
    /// Failures are logged, never fatal to boot.
    pub async fn resume_interrupted(&self) {
        let accounts = match self.store.accounts_needing_resume().await {
            Ok(accounts) => accounts,
            Err(err) => {
                log::error!("failed to scan for interrupted pipelines: {}", err);
                return;
            }
        };

        log::info!("resuming {} interrupted pipeline(s) at boot", accounts.len());
        for account in accounts {
            use super::types::{ProcessingStatus, SyncStatus};
            let supervisor = self.clone();
            if account.sync_status == SyncStatus::Syncing {
                tokio::spawn(async move { supervisor.run_sync(account.id).await });
            } else if account.processing_status == ProcessingStatus::Analyzing {
                tokio::spawn(async move { supervisor.run_processing(account.id).await });
            }
        }
    }
}
