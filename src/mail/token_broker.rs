//! Token Broker: `AccessToken(account) -> bearer`. Decrypts the stored
//! access token and returns it directly when it still has headroom before
//! expiry; otherwise refreshes against the provider's token endpoint and
//! writes the new encrypted token back atomically.

use chrono::{Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::secrets::SecretCipher;

use super::config::PipelineConfig;
use super::error::TokenBrokerError;

#[derive(Clone)]
pub struct TokenBroker {
    pool: PgPool,
    http: Client,
    cipher: SecretCipher,
    token_endpoint_url: String,
    refresh_buffer: Duration,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
    expires_in: i64,
}

impl TokenBroker {
    pub fn new(pool: PgPool, http: Client, cipher: SecretCipher, config: &PipelineConfig) -> Self {
        Self {
            pool,
            http,
            cipher,
            token_endpoint_url: config.token_endpoint_url.clone(),
            refresh_buffer: Duration::milliseconds(config.token_refresh_buffer_ms),
        }
    }

    pub async fn access_token(&self, account_id: Uuid) -> Result<String, TokenBrokerError> {
        let row = sqlx::query_as::<_, StoredToken>(
            "SELECT a.encrypted_access_token, a.encrypted_refresh_token, a.token_expires_at,
                    c.client_id, c.encrypted_client_secret
             FROM accounts a
             JOIN credentials c ON c.id = a.credential_id
             WHERE a.id = $1",
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;

        let fresh_enough = row
            .token_expires_at
            .map(|expiry| expiry - Utc::now() >= self.refresh_buffer)
            .unwrap_or(false);

        if fresh_enough {
            if let Some(encrypted) = &row.encrypted_access_token {
                return Ok(self.cipher.decrypt_str(encrypted)?);
            }
        }

        self.refresh(account_id, &row).await
    }

    async fn refresh(&self, account_id: Uuid, row: &StoredToken) -> Result<String, TokenBrokerError> {
        let refresh_token_encrypted = row
            .encrypted_refresh_token
            .as_ref()
            .ok_or(TokenBrokerError::MissingCredential(account_id))?;
        let refresh_token = self.cipher.decrypt_str(refresh_token_encrypted)?;
        let client_secret = self.cipher.decrypt_str(&row.encrypted_client_secret)?;

        let response = self
            .http
            .post(&self.token_endpoint_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", row.client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TokenBrokerError::RefreshRejected { status, body });
        }

        let parsed: RefreshResponse = response.json().await?;
        let expires_at = Utc::now() + Duration::seconds(parsed.expires_in);
        let encrypted_access = self.cipher.encrypt_str(&parsed.access_token)?;

        sqlx::query(
            "UPDATE accounts SET encrypted_access_token = $2, token_expires_at = $3, updated_at = now()
             WHERE id = $1",
        )
        .bind(account_id)
        .bind(&encrypted_access)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(parsed.access_token)
    }
}

#[derive(sqlx::FromRow)]
struct StoredToken {
    encrypted_access_token: Option<Vec<u8>>,
    encrypted_refresh_token: Option<Vec<u8>>,
    token_expires_at: Option<chrono::DateTime<Utc>>,
    client_id: String,
    encrypted_client_secret: Vec<u8>,
}
