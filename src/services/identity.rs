// src/services/identity.rs
//! Google ID token verification
//!
//! Google's tokeninfo endpoint checks the signature. This module checks the
//! audience and expiry of the answer and turns it into [`IdentityClaims`].
//! Docs: https://developers.google.com/identity/sign-in/web/backend-auth

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use session_validator::Clock;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

pub const GOOGLE_TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

/// Claims the identity provider vouched for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityClaims {
    pub issuer: String,
    pub subject: String,
    pub email: String,
    pub email_verified: bool,
    pub display_name: String,
    pub avatar_url: String,
    pub nonce: String,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    /// The credential itself is bad: malformed, expired, wrong audience.
    #[error("identity token rejected: {0}")]
    Rejected(String),

    /// The provider could not be asked.
    #[error("identity provider unavailable: {0}")]
    Transport(String),
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn validate(
        &self,
        id_token: &str,
        audience: &str,
    ) -> Result<IdentityClaims, IdentityError>;
}

/// Verifies Google ID tokens through the tokeninfo endpoint.
pub struct GoogleTokenInfoVerifier {
    http: Client,
    endpoint: String,
    clock: Arc<dyn Clock>,
}

impl GoogleTokenInfoVerifier {
    pub fn new(clock: Arc<dyn Clock>, timeout: Duration) -> Result<Self, IdentityError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IdentityError::Transport(e.to_string()))?;
        Ok(Self::with_client(http, GOOGLE_TOKENINFO_URL, clock))
    }

    pub fn with_client(http: Client, endpoint: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            clock,
        }
    }
}

#[async_trait]
impl IdentityVerifier for GoogleTokenInfoVerifier {
    async fn validate(
        &self,
        id_token: &str,
        audience: &str,
    ) -> Result<IdentityClaims, IdentityError> {
        if id_token.trim().is_empty() {
            return Err(IdentityError::Rejected("empty id_token".to_string()));
        }

        debug!("Initiating Google token validation with tokeninfo endpoint");

        let response = self
            .http
            .get(&self.endpoint)
            .query(&[("id_token", id_token)])
            .send()
            .await
            .map_err(|e| {
                error!(
                    error = %e,
                    endpoint = %self.endpoint,
                    "HTTP error contacting Google tokeninfo endpoint"
                );
                IdentityError::Transport(e.to_string())
            })?;

        let status = response.status();
        debug!(http_status = %status, "Received response from Google tokeninfo endpoint");

        if status.is_client_error() {
            warn!(http_status = %status, "Google tokeninfo rejected the id_token");
            return Err(IdentityError::Rejected(format!("tokeninfo status {status}")));
        }
        if !status.is_success() {
            error!(http_status = %status, "Google tokeninfo returned error status");
            return Err(IdentityError::Transport(format!("tokeninfo status {status}")));
        }

        let body = response.json::<Value>().await.map_err(|e| {
            error!(error = %e, "Failed to parse Google tokeninfo JSON response");
            IdentityError::Transport(e.to_string())
        })?;

        claims_from_tokeninfo(&body, audience, self.clock.now().timestamp())
    }
}

fn string_field(body: &Value, key: &str) -> String {
    body.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

// tokeninfo encodes numbers and booleans as strings
fn i64_field(body: &Value, key: &str) -> Option<i64> {
    match body.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn bool_field(body: &Value, key: &str) -> bool {
    match body.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Checks audience and expiry of a tokeninfo answer and extracts the claims.
pub fn claims_from_tokeninfo(
    body: &Value,
    audience: &str,
    now_unix: i64,
) -> Result<IdentityClaims, IdentityError> {
    let aud = string_field(body, "aud");
    if aud.is_empty() {
        warn!("Google token missing audience field - rejecting token");
        return Err(IdentityError::Rejected("token missing audience".to_string()));
    }
    if aud != audience {
        warn!(
            token_audience = %aud,
            expected_client_id = %audience,
            "Google token audience validation failed - rejecting token"
        );
        return Err(IdentityError::Rejected("token audience mismatch".to_string()));
    }

    match i64_field(body, "exp") {
        Some(exp) if exp > now_unix => {}
        Some(exp) => {
            warn!(token_exp = exp, current_time = now_unix, "Google token has expired");
            return Err(IdentityError::Rejected("token has expired".to_string()));
        }
        None => {
            return Err(IdentityError::Rejected("token missing expiry".to_string()));
        }
    }

    Ok(IdentityClaims {
        issuer: string_field(body, "iss"),
        subject: string_field(body, "sub"),
        email: string_field(body, "email"),
        email_verified: bool_field(body, "email_verified"),
        display_name: string_field(body, "name"),
        avatar_url: string_field(body, "picture"),
        nonce: string_field(body, "nonce"),
    })
}
