//! Rotating refresh tokens
//!
//! The client holds an opaque secret; stores keep only its SHA-256 hash.
//! Records are never deleted. Revocation stamps `revoked_at_unix` once and
//! rotation links each new record to its predecessor through
//! `previous_token_id`.

mod memory;
mod sqlite;

pub use memory::MemoryRefreshStore;
pub use sqlite::SqliteRefreshStore;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, SecondsFormat, Utc};
use rand::RngCore;
use thiserror::Error;

use crate::common::generate_raw_id;

/// Random bytes in an opaque refresh secret
const OPAQUE_BYTES: usize = 32;

/// Cause of a refresh store failure. Callers match on this.
#[derive(Debug, Error)]
pub enum RefreshTokenError {
    #[error("empty refresh token")]
    EmptyOpaque,
    #[error("refresh token not found")]
    NotFound,
    #[error("refresh token revoked")]
    Revoked,
    #[error("refresh token expired")]
    Expired,
    #[error("refresh token already revoked")]
    AlreadyRevoked,
    #[error("refresh token already stored")]
    Duplicate,
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Coarse cause without the storage payload, for matching and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshErrorKind {
    EmptyOpaque,
    NotFound,
    Revoked,
    Expired,
    AlreadyRevoked,
    Duplicate,
    Storage,
}

/// A [`RefreshTokenError`] scoped to the backend and operation that raised it.
#[derive(Debug, Error)]
#[error("refresh_store.{operation}.{backend}: {source}")]
pub struct RefreshStoreError {
    pub backend: &'static str,
    pub operation: &'static str,
    #[source]
    pub source: RefreshTokenError,
}

impl RefreshStoreError {
    pub fn new(backend: &'static str, operation: &'static str, source: RefreshTokenError) -> Self {
        Self {
            backend,
            operation,
            source,
        }
    }

    pub fn kind(&self) -> RefreshErrorKind {
        match self.source {
            RefreshTokenError::EmptyOpaque => RefreshErrorKind::EmptyOpaque,
            RefreshTokenError::NotFound => RefreshErrorKind::NotFound,
            RefreshTokenError::Revoked => RefreshErrorKind::Revoked,
            RefreshTokenError::Expired => RefreshErrorKind::Expired,
            RefreshTokenError::AlreadyRevoked => RefreshErrorKind::AlreadyRevoked,
            RefreshTokenError::Duplicate => RefreshErrorKind::Duplicate,
            RefreshTokenError::Storage(_) => RefreshErrorKind::Storage,
        }
    }
}

/// Returned by [`RefreshTokenStore::issue`]. `opaque` goes to the client only.
#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    pub token_id: String,
    pub opaque: String,
}

/// Returned by [`RefreshTokenStore::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRefreshToken {
    pub user_id: String,
    pub token_id: String,
    pub expires_unix: i64,
}

/// Full persisted record.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RefreshTokenRecord {
    pub token_id: String,
    pub user_id: String,
    pub token_hash: String,
    pub expires_unix: i64,
    pub revoked_at_unix: i64,
    pub previous_token_id: String,
    pub issued_at_unix: i64,
}

impl RefreshTokenRecord {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at_unix != 0
    }
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Persists a new active token for `user_id`, optionally chained to
    /// `previous_token_id` (empty for a fresh login). An id or hash that is
    /// already stored fails with [`RefreshTokenError::Duplicate`] and leaves
    /// the existing record untouched.
    async fn issue(
        &self,
        user_id: &str,
        expires_unix: i64,
        previous_token_id: &str,
    ) -> Result<IssuedRefreshToken, RefreshStoreError>;

    async fn validate(&self, opaque: &str) -> Result<ValidatedRefreshToken, RefreshStoreError>;

    /// Marks `token_id` revoked. A second call reports
    /// [`RefreshTokenError::AlreadyRevoked`] instead of succeeding.
    async fn revoke(&self, token_id: &str) -> Result<(), RefreshStoreError>;
}

/// Fresh opaque secret: 32 random bytes, URL-safe base64.
pub(crate) fn new_opaque_token() -> String {
    let mut buffer = [0u8; OPAQUE_BYTES];
    rand::thread_rng().fill_bytes(&mut buffer);
    URL_SAFE_NO_PAD.encode(buffer)
}

/// Token id derived from the issue time plus a short random suffix, so ids
/// stay unique when two tokens share a timestamp. Carries no secret.
pub(crate) fn new_token_id(now: DateTime<Utc>) -> String {
    let stamp = now.to_rfc3339_opts(SecondsFormat::Nanos, true);
    format!("{}-{}", URL_SAFE_NO_PAD.encode(stamp), generate_raw_id(6))
}


#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use chrono::TimeZone;

    #[test]
    fn test_error_display_is_scoped() {
        let err = RefreshStoreError::new("memory", "revoke", RefreshTokenError::AlreadyRevoked);
        assert_eq!(
            err.to_string(),
            "refresh_store.revoke.memory: refresh token already revoked"
        );
        assert_eq!(err.kind(), RefreshErrorKind::AlreadyRevoked);
    }

    #[test]
    fn test_token_id_is_not_secret_material() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let id = new_token_id(now);
        let (stamp, suffix) = id.rsplit_once('-').unwrap();

        let decoded = URL_SAFE_NO_PAD.decode(stamp).unwrap();
        assert_eq!(
            String::from_utf8(decoded).unwrap(),
            "2024-01-01T00:00:00.000000000Z"
        );
        assert_eq!(suffix.len(), 6);
    }

    #[test]
    fn test_opaque_tokens_differ() {
        assert_ne!(new_opaque_token(), new_opaque_token());
        assert_eq!(new_opaque_token().len(), 43);
    }
}
