//! One-time nonces binding a Google sign-in attempt to this service

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use session_validator::Clock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Random bytes per nonce before encoding
const NONCE_BYTES: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NonceError {
    /// Never issued, or already consumed
    #[error("nonce not found")]
    NotFound,
    #[error("nonce expired")]
    Expired,
}

/// Issues and consumes single-use nonce tokens.
#[async_trait]
pub trait NonceStore: Send + Sync {
    /// Creates a nonce valid for the store's TTL.
    async fn issue(&self) -> Result<String, NonceError>;

    /// Invalidates `token`. A found token is removed even when it turns out
    /// to be expired, so every token can be consumed at most once.
    async fn consume(&self, token: &str) -> Result<(), NonceError>;
}

/// Process-local nonce store. Losing it on restart only fails in-flight logins.
pub struct MemoryNonceStore {
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl MemoryNonceStore {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    fn random_token() -> String {
        let mut buffer = [0u8; NONCE_BYTES];
        rand::thread_rng().fill_bytes(&mut buffer);
        URL_SAFE_NO_PAD.encode(buffer)
    }
}

fn purge_expired(entries: &mut HashMap<String, DateTime<Utc>>, now: DateTime<Utc>) {
    entries.retain(|_, expires_at| now <= *expires_at);
}

#[async_trait]
impl NonceStore for MemoryNonceStore {
    async fn issue(&self) -> Result<String, NonceError> {
        let token = Self::random_token();
        let now = self.clock.now();

        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, now);
        entries.insert(token.clone(), now + self.ttl);
        Ok(token)
    }

    async fn consume(&self, token: &str) -> Result<(), NonceError> {
        let now = self.clock.now();

        let mut entries = self.entries.lock().await;
        let outcome = match entries.remove(token) {
            None => Err(NonceError::NotFound),
            Some(expires_at) if now > expires_at => Err(NonceError::Expired),
            Some(_) => Ok(()),
        };
        purge_expired(&mut entries, now);
        outcome
    }
}
