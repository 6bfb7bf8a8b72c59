//! Mailbox ingestion and subscription extraction pipeline.
//!
//! This module owns the full lifecycle of a bound mailbox Account: binding
//! credentials, paginating and normalising remote messages into Mail Rows,
//! and classifying those rows into detected Subscriptions.
//!
//! # Components
//!
//! - **`query_builder`**: builds the provider filter string and its
//!   fingerprint for an initial or incremental sync.
//! - **`token_broker`**: mints a bearer for an Account, refreshing it
//!   against the provider's token endpoint when it's close to expiry.
//! - **`fetcher`**: lists remote message IDs and fetches/normalises a
//!   single message's full payload.
//! - **`sync_runner`**: the sync-phase state machine — resume, count,
//!   fetch, and complete.
//! - **`keyword_classifier`**: a pure, offline first-stage scorer.
//! - **`lm_classifier`**: escalates uncertain rows to a language model.
//! - **`process_runner`**: the process-phase state machine — batches
//!   unprocessed rows through the hybrid classifier and upserts
//!   Subscriptions.
//! - **`supervisor`**: the only entry point for starting a run; enforces
//!   at-most-one runner per (Account, phase) and resumes interrupted runs
//!   at boot.
//!
//! # Data Flow
//!
//! External request -> Supervisor -> Sync Runner -> Mail Store. Sync Runner
//! completion -> Supervisor -> Process Runner -> Keyword Classifier ->
//! (optionally) LM Classifier -> Mail Store (row update) + Subscription
//! upsert.

pub mod config;
pub mod error;
pub mod fetcher;
pub mod keyword_classifier;
pub mod lm_classifier;
pub mod process_runner;
pub mod query_builder;
pub mod store;
pub mod supervisor;
pub mod sync_runner;
pub mod token_broker;
pub mod types;

use reqwest::Client;
use sqlx::PgPool;

use crate::secrets::SecretCipher;

pub use config::PipelineConfig;
pub use store::MailStore;
pub use supervisor::Supervisor;
pub use types::{Account, ClassificationResult, Credential, MailRow, Subscription};

/// Wires together every collaborator and returns the single [`Supervisor`]
/// the rest of the application talks to.
pub fn build_supervisor(pool: PgPool, config: PipelineConfig, cipher: SecretCipher) -> Supervisor {
    let http = Client::builder()
        .user_agent("mailbox-pipeline/0.1")
        .build()
        .expect("building the shared reqwest client cannot fail with these settings");

    let store = MailStore::new(pool.clone());
    let token_broker = token_broker::TokenBroker::new(pool.clone(), http.clone(), cipher, &config);
    let fetcher = fetcher::MailFetcher::new(http.clone(), token_broker, &config);
    let sync_runner = sync_runner::SyncRunner::new(store.clone(), fetcher, config.clone());
    let lm_classifier = lm_classifier::LmClassifier::new(http, &config);
    let process_runner = process_runner::ProcessRunner::new(store.clone(), lm_classifier, config);

    Supervisor::new(store, sync_runner, process_runner)
}
