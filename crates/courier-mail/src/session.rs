//! Encrypted cookie payloads for mailbox sessions.
//!
//! Values are serialized to JSON, sealed with ChaCha20-Poly1305 and encoded
//! as base64url(nonce || ciphertext) so they are safe inside a cookie.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use courier_core::security::OAuthTokens;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("invalid encoding")]
    InvalidEncoding,
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

/// Seals and opens cookie values with a process-wide key.
#[derive(Clone)]
pub struct SessionCodec {
    key: [u8; 32],
}

impl SessionCodec {
    /// Derive the key from an operator-supplied secret of any length.
    pub fn from_secret(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self { key }
    }

    /// Random key; sessions do not survive a restart.
    pub fn ephemeral() -> Self {
        let mut key = [0u8; 32];
        chacha20poly1305::aead::rand_core::RngCore::fill_bytes(&mut OsRng, &mut key);
        Self { key }
    }

    pub fn seal<T: Serialize>(&self, value: &T) -> Result<String, SessionError> {
        let plaintext =
            serde_json::to_vec(value).map_err(|e| SessionError::InvalidPayload(e.to_string()))?;

        let cipher = ChaCha20Poly1305::new((&self.key).into());
        let mut nonce_bytes = [0u8; NONCE_LEN];
        chacha20poly1305::aead::rand_core::RngCore::fill_bytes(&mut OsRng, &mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|_| SessionError::EncryptionFailed)?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(combined))
    }

    pub fn open<T: DeserializeOwned>(&self, encoded: &str) -> Result<T, SessionError> {
        let combined = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| SessionError::InvalidEncoding)?;
        if combined.len() < NONCE_LEN {
            return Err(SessionError::InvalidEncoding);
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let cipher = ChaCha20Poly1305::new((&self.key).into());
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| SessionError::DecryptionFailed)?;

        serde_json::from_slice(&plaintext).map_err(|e| SessionError::InvalidPayload(e.to_string()))
    }
}

/// Cookie form of a signed-in mailbox session.
#[derive(Serialize, Deserialize)]
pub struct StoredSession {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_at: i64,
}

impl From<&OAuthTokens> for StoredSession {
    fn from(tokens: &OAuthTokens) -> Self {
        Self {
            access_token: tokens.access_token.expose_secret().to_string(),
            refresh_token: tokens
                .refresh_token
                .as_ref()
                .map(|r| r.expose_secret().to_string()),
            expires_at: tokens.expires_at,
        }
    }
}

impl From<StoredSession> for OAuthTokens {
    fn from(stored: StoredSession) -> Self {
        Self {
            access_token: SecretString::from(stored.access_token),
            refresh_token: stored.refresh_token.map(SecretString::from),
            expires_at: stored.expires_at,
        }
    }
}

/// Login in progress: binds the callback to the browser that started it.
#[derive(Serialize, Deserialize)]
pub struct PendingLogin {
    pub state: String,
    pub verifier: String,
}
