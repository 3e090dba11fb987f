//! Session token minting
//!
//! Verification lives in the `session_validator` crate so other services can
//! share it.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use session_validator::{Claims, Clock};
use thiserror::Error;

/// Backdating of `nbf` to tolerate skew between services
pub const NOT_BEFORE_SKEW_SECONDS: i64 = 30;

#[derive(Debug, Error)]
pub enum SessionTokenError {
    #[error("session token requires a user id")]
    MissingUserId,

    #[error("session token requires a signing key")]
    MissingSigningKey,

    #[error("failed to sign session token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

/// Identity fields written into a session token.
#[derive(Debug, Clone, Default)]
pub struct SessionIdentity {
    pub user_id: String,
    pub email: String,
    pub display_name: String,
    pub avatar_url: String,
    pub roles: Vec<String>,
}

/// Signs a session token valid for `ttl` from `clock.now()`.
pub fn mint_session_token(
    clock: &dyn Clock,
    identity: &SessionIdentity,
    issuer: &str,
    signing_key: &[u8],
    ttl: Duration,
) -> Result<(String, DateTime<Utc>), SessionTokenError> {
    if identity.user_id.trim().is_empty() {
        return Err(SessionTokenError::MissingUserId);
    }
    if signing_key.is_empty() {
        return Err(SessionTokenError::MissingSigningKey);
    }

    let issued_at = clock.now();
    let expires_at = issued_at + ttl;

    let claims = Claims {
        user_id: identity.user_id.clone(),
        user_email: identity.email.clone(),
        user_display_name: identity.display_name.clone(),
        user_avatar_url: identity.avatar_url.clone(),
        user_roles: identity.roles.clone(),
        iss: issuer.to_string(),
        sub: identity.user_id.clone(),
        iat: issued_at.timestamp(),
        nbf: issued_at.timestamp() - NOT_BEFORE_SKEW_SECONDS,
        exp: expires_at.timestamp(),
    };

    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(signing_key),
    )?;

    Ok((token, expires_at))
}
