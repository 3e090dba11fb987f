// src/services/users.rs
//! User profile stores
//!
//! Users are keyed by the identity provider's subject on login and by our own
//! user id afterwards.

use async_trait::async_trait;
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::common::{generate_user_id, safe_email_log};

pub const DEFAULT_ROLE: &str = "user";
const PROVIDER: &str = "google";

#[derive(Debug, Error)]
pub enum UserStoreError {
    #[error("user not found")]
    NotFound,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("malformed roles column: {0}")]
    MalformedRoles(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    pub user_id: String,
    pub email: String,
    pub display_name: String,
    pub avatar_url: String,
    pub roles: Vec<String>,
}

#[async_trait]
pub trait UserProfileStore: Send + Sync {
    /// Creates the user on first login, otherwise refreshes email, name and
    /// avatar. Returns the user id and roles.
    async fn upsert_by_subject(
        &self,
        subject: &str,
        email: &str,
        display_name: &str,
        avatar_url: &str,
    ) -> Result<(String, Vec<String>), UserStoreError>;

    async fn get_profile(&self, user_id: &str) -> Result<UserProfile, UserStoreError>;
}

/// Process-local profile store, ids are `google:<sub>`.
#[derive(Default)]
pub struct InMemoryUsers {
    profiles: RwLock<HashMap<String, UserProfile>>,
}

impl InMemoryUsers {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserProfileStore for InMemoryUsers {
    async fn upsert_by_subject(
        &self,
        subject: &str,
        email: &str,
        display_name: &str,
        avatar_url: &str,
    ) -> Result<(String, Vec<String>), UserStoreError> {
        let user_id = format!("{PROVIDER}:{subject}");

        let mut profiles = self.profiles.write().await;
        let profile = profiles
            .entry(user_id.clone())
            .or_insert_with(|| UserProfile {
                user_id: user_id.clone(),
                email: String::new(),
                display_name: String::new(),
                avatar_url: String::new(),
                roles: vec![DEFAULT_ROLE.to_string()],
            });
        profile.email = email.to_string();
        profile.display_name = display_name.to_string();
        profile.avatar_url = avatar_url.to_string();

        Ok((user_id, profile.roles.clone()))
    }

    async fn get_profile(&self, user_id: &str) -> Result<UserProfile, UserStoreError> {
        self.profiles
            .read()
            .await
            .get(user_id)
            .cloned()
            .ok_or(UserStoreError::NotFound)
    }
}

#[derive(FromRow)]
struct UserRow {
    id: String,
    email: String,
    name: Option<String>,
    avatar: Option<String>,
    roles: String,
}

impl UserRow {
    fn into_profile(self) -> Result<UserProfile, UserStoreError> {
        Ok(UserProfile {
            roles: serde_json::from_str(&self.roles)?,
            user_id: self.id,
            email: self.email,
            display_name: self.name.unwrap_or_default(),
            avatar_url: self.avatar.unwrap_or_default(),
        })
    }
}

/// Profiles in the `users` table; roles are a JSON array column.
pub struct SqliteUserStore {
    pool: SqlitePool,
}

impl SqliteUserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn optional(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

#[async_trait]
impl UserProfileStore for SqliteUserStore {
    async fn upsert_by_subject(
        &self,
        subject: &str,
        email: &str,
        display_name: &str,
        avatar_url: &str,
    ) -> Result<(String, Vec<String>), UserStoreError> {
        // id is only used when the row is new
        let candidate_id = generate_user_id();

        sqlx::query(
            r#"
            INSERT INTO users (id, email, name, avatar, provider, provider_id)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(provider, provider_id) DO UPDATE SET
                email = excluded.email,
                name = excluded.name,
                avatar = excluded.avatar,
                updated_at = datetime('now')
            "#,
        )
        .bind(&candidate_id)
        .bind(email)
        .bind(optional(display_name))
        .bind(optional(avatar_url))
        .bind(PROVIDER)
        .bind(subject)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, name, avatar, roles FROM users WHERE provider = ? AND provider_id = ?",
        )
        .bind(PROVIDER)
        .bind(subject)
        .fetch_one(&self.pool)
        .await?;

        if row.id == candidate_id {
            info!(
                user_id = %row.id,
                email = %safe_email_log(email),
                provider = PROVIDER,
                "Created user account"
            );
        } else {
            debug!(user_id = %row.id, provider = PROVIDER, "Updated existing user");
        }

        let profile = row.into_profile()?;
        Ok((profile.user_id, profile.roles))
    }

    async fn get_profile(&self, user_id: &str) -> Result<UserProfile, UserStoreError> {
        sqlx::query_as::<_, UserRow>(
            "SELECT id, email, name, avatar, roles FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(UserStoreError::NotFound)?
        .into_profile()
    }
}
