//! Durable refresh store on SQLite
//!
//! Concurrency is left to the database: `token_hash` is UNIQUE and revoke is
//! a conditional UPDATE, so several service instances can share one file.

use async_trait::async_trait;
use session_validator::Clock;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;

use super::{
    new_opaque_token, new_token_id, IssuedRefreshToken, RefreshStoreError, RefreshTokenError,
    RefreshTokenRecord, RefreshTokenStore, ValidatedRefreshToken,
};
use crate::auth::binding::hash_opaque;

const BACKEND: &str = "sqlite";

pub struct SqliteRefreshStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteRefreshStore {
    /// Expects the `refresh_tokens` table from `run_migrations`.
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    async fn insert(&self, record: &RefreshTokenRecord) -> Result<(), RefreshStoreError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens
                (token_id, user_id, token_hash, expires_unix, revoked_at_unix,
                 previous_token_id, issued_at_unix)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.token_id)
        .bind(&record.user_id)
        .bind(&record.token_hash)
        .bind(record.expires_unix)
        .bind(record.revoked_at_unix)
        .bind(&record.previous_token_id)
        .bind(record.issued_at_unix)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                fail("issue", RefreshTokenError::Duplicate)
            }
            other => fail("issue", RefreshTokenError::Storage(other)),
        })?;
        Ok(())
    }

    #[cfg(test)]
    pub async fn record(&self, token_id: &str) -> Result<Option<RefreshTokenRecord>, sqlx::Error> {
        sqlx::query_as::<_, RefreshTokenRecord>("SELECT * FROM refresh_tokens WHERE token_id = ?")
            .bind(token_id)
            .fetch_optional(&self.pool)
            .await
    }
}

fn fail(operation: &'static str, source: RefreshTokenError) -> RefreshStoreError {
    RefreshStoreError::new(BACKEND, operation, source)
}

fn storage(operation: &'static str) -> impl FnOnce(sqlx::Error) -> RefreshStoreError {
    move |e| fail(operation, RefreshTokenError::Storage(e))
}

#[async_trait]
impl RefreshTokenStore for SqliteRefreshStore {
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

        self.insert(&record).await?;
        debug!(token_id = %record.token_id, user_id = %user_id, "Stored refresh token");

        Ok(IssuedRefreshToken {
            token_id: record.token_id,
            opaque,
        })
    }

    async fn validate(&self, opaque: &str) -> Result<ValidatedRefreshToken, RefreshStoreError> {
        if opaque.is_empty() {
            return Err(fail("validate", RefreshTokenError::EmptyOpaque));
        }

        let record = sqlx::query_as::<_, RefreshTokenRecord>(
            "SELECT * FROM refresh_tokens WHERE token_hash = ?",
        )
        .bind(hash_opaque(opaque))
        .fetch_optional(&self.pool)
        .await
        .map_err(storage("validate"))?
        .ok_or_else(|| fail("validate", RefreshTokenError::NotFound))?;

        if record.is_revoked() {
            return Err(fail("validate", RefreshTokenError::Revoked));
        }
        if record.expires_unix <= self.clock.now().timestamp() {
            return Err(fail("validate", RefreshTokenError::Expired));
        }

        Ok(ValidatedRefreshToken {
            user_id: record.user_id,
            token_id: record.token_id,
            expires_unix: record.expires_unix,
        })
    }

    async fn revoke(&self, token_id: &str) -> Result<(), RefreshStoreError> {
        let revoked_at = self.clock.now().timestamp().max(1);

        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at_unix = ? WHERE token_id = ? AND revoked_at_unix = 0",
        )
        .bind(revoked_at)
        .bind(token_id)
        .execute(&self.pool)
        .await
        .map_err(storage("revoke"))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        // Nothing changed: the row is missing or someone else revoked it first.
        let exists: Option<(String,)> =
            sqlx::query_as("SELECT token_id FROM refresh_tokens WHERE token_id = ?")
                .bind(token_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage("revoke"))?;

        match exists {
            Some(_) => Err(fail("revoke", RefreshTokenError::AlreadyRevoked)),
            None => Err(fail("revoke", RefreshTokenError::NotFound)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{contract, RefreshErrorKind};
    use super::*;
    use crate::common::migrations::run_migrations;
    use chrono::{Duration, TimeZone, Utc};
    use session_validator::ManualClock;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

    async fn store() -> (SqliteRefreshStore, Arc<ManualClock>) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();

        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        (SqliteRefreshStore::new(pool, clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_rotation() {
        let (store, clock) = store().await;
        contract::rotation(&store, &clock).await;
    }

    #[tokio::test]
    async fn test_idempotent_revoke() {
        let (store, clock) = store().await;
        contract::idempotent_revoke(&store, &clock).await;
    }

    #[tokio::test]
    async fn test_revoke_unknown() {
        let (store, _clock) = store().await;
        contract::revoke_unknown(&store).await;
    }

    #[tokio::test]
    async fn test_validate_edge_cases() {
        let (store, clock) = store().await;
        contract::validate_edge_cases(&store, &clock).await;
    }

    #[tokio::test]
    async fn test_ids_unique_under_frozen_clock() {
        let (store, clock) = store().await;
        contract::ids_unique_under_frozen_clock(&store, &clock).await;
    }

    #[tokio::test]
    async fn test_rotation_chain_is_persisted() {
        let (store, clock) = store().await;
        let expires = (clock.now() + Duration::hours(1)).timestamp();

        let first = store.issue("U_1", expires, "").await.unwrap();
        let second = store.issue("U_1", expires, &first.token_id).await.unwrap();

        let record = store.record(&second.token_id).await.unwrap().unwrap();
        assert_eq!(record.previous_token_id, first.token_id);
        assert_eq!(record.token_hash, hash_opaque(&second.opaque));
        assert_eq!(record.revoked_at_unix, 0);

        clock.advance(Duration::minutes(3));
        store.revoke(&first.token_id).await.unwrap();
        let record = store.record(&first.token_id).await.unwrap().unwrap();
        assert_eq!(record.revoked_at_unix, clock.now().timestamp());
    }

    #[tokio::test]
    async fn test_insert_rejects_stored_hash() {
        let (store, clock) = store().await;
        let expires = (clock.now() + Duration::hours(1)).timestamp();
        let issued = store.issue("U_1", expires, "").await.unwrap();
        let original = store.record(&issued.token_id).await.unwrap().unwrap();

        let mut clash = original.clone();
        clash.token_id = "T_other".to_string();
        clash.user_id = "U_2".to_string();
        let err = store.insert(&clash).await.unwrap_err();
        assert_eq!(err.kind(), RefreshErrorKind::Duplicate);
        assert_eq!(err.operation, "issue");

        let validated = store.validate(&issued.opaque).await.unwrap();
        assert_eq!(validated.user_id, "U_1");
        assert!(store.record("T_other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_revokes_have_one_winner() {
        let path = std::env::temp_dir().join(format!(
            "tauth-revoke-race-{}.db",
            crate::common::generate_raw_id(10)
        ));
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();

        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let store = SqliteRefreshStore::new(pool.clone(), clock.clone());
        let expires = (clock.now() + Duration::hours(1)).timestamp();

        for _ in 0..10 {
            let issued = store.issue("U_1", expires, "").await.unwrap();
            let (a, b) = tokio::join!(
                store.revoke(&issued.token_id),
                store.revoke(&issued.token_id)
            );

            let outcomes = [a, b];
            let won = outcomes.iter().filter(|r| r.is_ok()).count();
            let lost: Vec<_> = outcomes
                .iter()
                .filter_map(|r| r.as_ref().err())
                .map(|e| e.kind())
                .collect();
            assert_eq!(won, 1);
            assert_eq!(lost, vec![RefreshErrorKind::AlreadyRevoked]);
        }

        pool.close().await;
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_storage_errors_are_scoped() {
        let (store, _clock) = store().await;
        store.pool.close().await;

        let err = store.issue("U_1", 10, "").await.unwrap_err();
        assert_eq!(err.kind(), RefreshErrorKind::Storage);
        assert!(err.to_string().starts_with("refresh_store.issue.sqlite"));
    }
}
