//! Authentication extractors for Axum

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use chrono::{DateTime, Utc};
use session_validator::Claims;
use tracing::{debug, warn};

use crate::common::{safe_email_log, ApiError};

/// Authenticated user extractor
///
/// Reads the claims that the session middleware stored on the request, so it
/// only works on routes behind `require_session`.
#[derive(Debug, Clone)]
pub struct AuthedUser {
    pub id: String,
    pub email: String,
    pub roles: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub claims: Claims,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let claims = match parts.extensions.get::<Claims>() {
            Some(claims) => claims.clone(),
            None => {
                warn!("Authentication failed: no validated session on request");
                return Err(ApiError::Unauthorized("missing_session".into()));
            }
        };

        let expires_at = claims
            .expires_at()
            .ok_or_else(|| ApiError::Unauthorized("invalid_session".into()))?;

        debug!(
            user_id = %claims.user_id,
            email = %safe_email_log(&claims.user_email),
            "User authentication successful via extractor"
        );

        Ok(AuthedUser {
            id: claims.user_id.clone(),
            email: claims.user_email.clone(),
            roles: claims.user_roles.clone(),
            expires_at,
            claims,
        })
    }
}
