//! Volatile refresh store for single-instance and test deployments

use async_trait::async_trait;
use session_validator::Clock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{
    new_opaque_token, new_token_id, IssuedRefreshToken, RefreshStoreError, RefreshTokenError,
    RefreshTokenRecord, RefreshTokenStore, ValidatedRefreshToken,
};
use crate::auth::binding::hash_opaque;

const BACKEND: &str = "memory";

#[derive(Default)]
struct Records {
    by_id: HashMap<String, RefreshTokenRecord>,
    // token_hash -> token_id
    by_hash: HashMap<String, String>,
}

impl Records {
    fn insert(&mut self, record: RefreshTokenRecord) -> Result<(), RefreshTokenError> {
        let taken = self.by_hash.contains_key(&record.token_hash)
            || self.by_id.contains_key(&record.token_id);
        if taken {
            return Err(RefreshTokenError::Duplicate);
        }
        self.by_hash
            .insert(record.token_hash.clone(), record.token_id.clone());
        self.by_id.insert(record.token_id.clone(), record);
        Ok(())
    }
}

pub struct MemoryRefreshStore {
    records: Mutex<Records>,
    clock: Arc<dyn Clock>,
}

impl MemoryRefreshStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Mutex::new(Records::default()),
            clock,
        }
    }

    #[cfg(test)]
    pub async fn record(&self, token_id: &str) -> Option<RefreshTokenRecord> {
        self.records.lock().await.by_id.get(token_id).cloned()
    }
}

fn fail(operation: &'static str, source: RefreshTokenError) -> RefreshStoreError {
    RefreshStoreError::new(BACKEND, operation, source)
}

#[async_trait]
impl RefreshTokenStore for MemoryRefreshStore {
    async fn issue(
        &self,
        user_id: &str,
        expires_unix: i64,
        previous_token_id: &str,
    ) -> Result<IssuedRefreshToken, RefreshStoreError> {
        let now = self.clock.now();
        let opaque = new_opaque_token();
        let record = RefreshTokenRecord {
            token_id: new_token_id(now),
            user_id: user_id.to_string(),
            token_hash: hash_opaque(&opaque),
            expires_unix,
            revoked_at_unix: 0,
            previous_token_id: previous_token_id.to_string(),
            issued_at_unix: now.timestamp(),
        };

        let token_id = record.token_id.clone();
        self.records
            .lock()
            .await
            .insert(record)
            .map_err(|e| fail("issue", e))?;

        Ok(IssuedRefreshToken { token_id, opaque })
    }

    async fn validate(&self, opaque: &str) -> Result<ValidatedRefreshToken, RefreshStoreError> {
        if opaque.is_empty() {
            return Err(fail("validate", RefreshTokenError::EmptyOpaque));
        }
        let hash = hash_opaque(opaque);
        let now = self.clock.now().timestamp();

        let records = self.records.lock().await;
        let record = records
            .by_hash
            .get(&hash)
            .and_then(|id| records.by_id.get(id))
            .ok_or_else(|| fail("validate", RefreshTokenError::NotFound))?;

        if record.is_revoked() {
            return Err(fail("validate", RefreshTokenError::Revoked));
        }
        if record.expires_unix <= now {
            return Err(fail("validate", RefreshTokenError::Expired));
        }

        Ok(ValidatedRefreshToken {
            user_id: record.user_id.clone(),
            token_id: record.token_id.clone(),
            expires_unix: record.expires_unix,
        })
    }

    async fn revoke(&self, token_id: &str) -> Result<(), RefreshStoreError> {
        let now = self.clock.now().timestamp();

        let mut records = self.records.lock().await;
        let record = records
            .by_id
            .get_mut(token_id)
            .ok_or_else(|| fail("revoke", RefreshTokenError::NotFound))?;

        if record.is_revoked() {
            return Err(fail("revoke", RefreshTokenError::AlreadyRevoked));
        }
        // 0 is the active sentinel, so never stamp 0 itself
        record.revoked_at_unix = now.max(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::contract;
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use session_validator::ManualClock;

    fn store() -> (MemoryRefreshStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        (MemoryRefreshStore::new(clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_rotation() {
        let (store, clock) = store();
        contract::rotation(&store, &clock).await;
    }

    #[tokio::test]
    async fn test_idempotent_revoke() {
        let (store, clock) = store();
        contract::idempotent_revoke(&store, &clock).await;
    }

    #[tokio::test]
    async fn test_revoke_unknown() {
        let (store, _clock) = store();
        contract::revoke_unknown(&store).await;
    }

    #[tokio::test]
    async fn test_validate_edge_cases() {
        let (store, clock) = store();
        contract::validate_edge_cases(&store, &clock).await;
    }

    #[tokio::test]
    async fn test_ids_unique_under_frozen_clock() {
        let (store, clock) = store();
        contract::ids_unique_under_frozen_clock(&store, &clock).await;
    }

    #[tokio::test]
    async fn test_secret_is_not_stored() {
        let (store, clock) = store();
        let expires = (clock.now() + Duration::hours(1)).timestamp();
        let issued = store.issue("U_1", expires, "prev").await.unwrap();

        let record = store.record(&issued.token_id).await.unwrap();
        assert_ne!(record.token_hash, issued.opaque);
        assert_eq!(record.token_hash, hash_opaque(&issued.opaque));
        assert_eq!(record.previous_token_id, "prev");
        assert_eq!(record.revoked_at_unix, 0);
        assert_eq!(record.issued_at_unix, clock.now().timestamp());
    }

    #[test]
    fn test_insert_keeps_existing_record_on_collision() {
        let record = RefreshTokenRecord {
            token_id: "T_1".to_string(),
            user_id: "U_1".to_string(),
            token_hash: "same-hash".to_string(),
            expires_unix: 100,
            revoked_at_unix: 0,
            previous_token_id: String::new(),
            issued_at_unix: 1,
        };
        let mut records = Records::default();
        records.insert(record.clone()).unwrap();

        let mut clash = record.clone();
        clash.token_id = "T_2".to_string();
        clash.user_id = "U_2".to_string();
        let err = records.insert(clash).unwrap_err();
        assert!(matches!(err, RefreshTokenError::Duplicate));

        let mut same_id = record.clone();
        same_id.token_hash = "other-hash".to_string();
        assert!(matches!(
            records.insert(same_id),
            Err(RefreshTokenError::Duplicate)
        ));

        assert_eq!(
            records.by_hash.get("same-hash").map(String::as_str),
            Some("T_1")
        );
        assert_eq!(records.by_id.get("T_1"), Some(&record));
        assert_eq!(records.by_id.len(), 1);
    }
}
