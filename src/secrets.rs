//! At-rest encryption for stored OAuth secrets (client secrets, access and
//! refresh tokens). The key-management service that provisions
//! `MAILBOX_SECRET_KEY` is an external collaborator; this module is
//! deliberately the thinnest possible implementation of its interface —
//! encrypt/decrypt bytes under one symmetric key.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use rand::RngCore;
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum SecretCipherError {
    #[error("MAILBOX_SECRET_KEY is not set")]
    MissingKey,
    #[error("MAILBOX_SECRET_KEY must decode to exactly 32 bytes, got {0}")]
    BadKeyLength(usize),
    #[error("MAILBOX_SECRET_KEY is not valid base64: {0}")]
    BadKeyEncoding(base64::DecodeError),
    #[error("ciphertext is shorter than the nonce prefix")]
    Truncated,
    #[error("decryption failed: ciphertext or key mismatch")]
    Decrypt,
    #[error("encryption failed")]
    Encrypt,
}

pub type SecretResult<T> = Result<T, SecretCipherError>;

/// AES-256-GCM envelope over a single key loaded once at boot.
#[derive(Clone)]
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl SecretCipher {
    pub fn from_env() -> SecretResult<Self> {
        let encoded =
            std::env::var("MAILBOX_SECRET_KEY").map_err(|_| SecretCipherError::MissingKey)?;
        let key_bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(SecretCipherError::BadKeyEncoding)?;
        if key_bytes.len() != 32 {
            return Err(SecretCipherError::BadKeyLength(key_bytes.len()));
        }
        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Encrypt `plaintext`, returning `nonce || ciphertext` as one blob suitable
    /// for storage in a `BYTEA` column.
    pub fn encrypt(&self, plaintext: &[u8]) -> SecretResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| SecretCipherError::Encrypt)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn encrypt_str(&self, plaintext: &str) -> SecretResult<Vec<u8>> {
        self.encrypt(plaintext.as_bytes())
    }

    pub fn decrypt(&self, blob: &[u8]) -> SecretResult<Vec<u8>> {
        if blob.len() < NONCE_LEN {
            return Err(SecretCipherError::Truncated);
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| SecretCipherError::Decrypt)
    }

    pub fn decrypt_str(&self, blob: &[u8]) -> SecretResult<String> {
        let bytes = self.decrypt(blob)?;
        String::from_utf8(bytes).map_err(|_| SecretCipherError::Decrypt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> SecretCipher {
        unsafe {
            std::env::set_var(
                "MAILBOX_SECRET_KEY",
                base64::engine::general_purpose::STANDARD.encode([7u8; 32]),
            );
        }
        SecretCipher::from_env().expect("cipher from env")
    }

    #[test]
    fn round_trips_plaintext() {
        let cipher = test_cipher();
        let blob = cipher.encrypt_str("super-secret-refresh-token").unwrap();
        assert_ne!(blob, b"super-secret-refresh-token".to_vec());
        let recovered = cipher.decrypt_str(&blob).unwrap();
        assert_eq!(recovered, "super-secret-refresh-token");
    }

    #[test]
    fn rejects_tampered_ciphertext() {
        let cipher = test_cipher();
        let mut blob = cipher.encrypt_str("netflix-client-secret").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xFF;
        assert!(cipher.decrypt(&blob).is_err());
    }

    #[test]
    fn rejects_wrong_key_length() {
        unsafe {
            std::env::set_var("MAILBOX_SECRET_KEY", base64::engine::general_purpose::STANDARD.encode([1u8; 16]));
        }
        assert!(matches!(
            SecretCipher::from_env(),
            Err(SecretCipherError::BadKeyLength(16))
        ));
    }
}
