use chrono::Utc;
use mailbox_pipeline::mail::keyword_classifier::classify;
use mailbox_pipeline::mail::types::{AiProvider, BillingCycle};
use mailbox_pipeline::test_support::{TestDatabase, TestDatabaseError};
use rust_decimal_macros::dec;
use uuid::Uuid;

async fn provision() -> Option<TestDatabase> {
    match TestDatabase::new_from_env().await {
        Ok(db) => Some(db),
        Err(TestDatabaseError::MissingUrl) => {
            eprintln!("skipping mail pipeline test: TEST_DATABASE_URL not set");
            None
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    }
}

async fn seed_account(pool: &sqlx::PgPool) -> (i32, Uuid) {
    let user_id: i32 = sqlx::query_scalar(
        "INSERT INTO users (auth_provider, email, role) VALUES ('local', $1, 'user') RETURNING id",
    )
    .bind(format!("user-{}@example.com", Uuid::new_v4()))
    .fetch_one(pool)
    .await
    .expect("insert user");

    let credential_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO credentials (id, user_id, provider, client_id, encrypted_client_secret)
         VALUES ($1, $2, 'google', 'client', $3)",
    )
    .bind(credential_id)
    .bind(user_id)
    .bind(b"ciphertext".to_vec())
    .execute(pool)
    .await
    .expect("insert credential");

    let account_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO accounts (id, user_id, credential_id, mailbox_address)
         VALUES ($1, $2, $3, 'user@example.com')",
    )
    .bind(account_id)
    .bind(user_id)
    .bind(credential_id)
    .execute(pool)
    .await
    .expect("insert account");

    (user_id, account_id)
}

/// Scenario 4 from the pipeline's worked examples: a newsletter with no
/// amount or service keyword scores 0 confidence and is never escalated.
#[tokio::test]
async fn keyword_rejection_is_free_and_cheap() {
    let Some(test_db) = provision().await else {
        return;
    };
    let pool = test_db.pool_clone();
    let (_, account_id) = seed_account(&pool).await;

    let store = mailbox_pipeline::mail::MailStore::new(pool.clone());
    let row_id = store
        .upsert_mail_row(
            account_id,
            "msg-1",
            "Your weekly newsletter",
            "news@example.com",
            Some("Nothing to see here."),
            None,
            Utc::now(),
        )
        .await
        .expect("upsert mail row");

    let row = sqlx::query_as::<_, mailbox_pipeline::mail::types::MailRow>(
        "SELECT * FROM mail_rows WHERE id = $1",
    )
    .bind(row_id)
    .fetch_one(&pool)
    .await
    .expect("fetch row");

    let result = classify(&row);
    assert_eq!(result.confidence, 0.0);
    assert!(!result.is_subscription);

    store
        .mark_mail_row_processed(row_id, false, 0.0, None, AiProvider::Keywords, "")
        .await
        .expect("mark processed");

    let unprocessed = store.count_unprocessed(account_id).await.expect("count");
    assert_eq!(unprocessed, 0);

    test_db.close().await.expect("close test database");
}

/// Scenario 6: upserting the same `(user, service_name, amount)` twice
/// leaves the subscription count unchanged on the second call.
#[tokio::test]
async fn duplicate_subscriptions_are_suppressed() {
    let Some(test_db) = provision().await else {
        return;
    };
    let pool = test_db.pool_clone();
    let (user_id, _) = seed_account(&pool).await;

    let store = mailbox_pipeline::mail::MailStore::new(pool.clone());

    let first = store
        .upsert_subscription(
            user_id,
            None,
            "Netflix",
            dec!(15.99),
            "USD",
            BillingCycle::Monthly,
            None,
            0.98,
        )
        .await
        .expect("first upsert");
    assert!(first.is_some());

    let second = store
        .upsert_subscription(
            user_id,
            None,
            "Netflix",
            dec!(15.99),
            "USD",
            BillingCycle::Monthly,
            None,
            0.98,
        )
        .await
        .expect("second upsert");
    assert!(second.is_none(), "duplicate insert must be suppressed");

    let subscriptions = store
        .list_subscriptions_for_user(user_id)
        .await
        .expect("list subscriptions");
    assert_eq!(subscriptions.len(), 1);

    test_db.close().await.expect("close test database");
}

/// §5/§7: a crashed `syncing` account is picked up by `accounts_needing_resume`
/// and its claim gate refuses a concurrent second claim.
#[tokio::test]
async fn interrupted_sync_is_discoverable_and_claim_is_advisory() {
    let Some(test_db) = provision().await else {
        return;
    };
    let pool = test_db.pool_clone();
    let (_, account_id) = seed_account(&pool).await;

    let store = mailbox_pipeline::mail::MailStore::new(pool.clone());

    let claimed = store.try_claim_sync(account_id).await.expect("claim sync");
    assert!(claimed, "first claim should win");

    let second_claim = store.try_claim_sync(account_id).await.expect("second claim attempt");
    assert!(!second_claim, "an already-syncing account must refuse a second claim");

    let needing_resume = store
        .accounts_needing_resume()
        .await
        .expect("scan for resume");
    assert!(needing_resume.iter().any(|account| account.id == account_id));

    test_db.close().await.expect("close test database");
}
