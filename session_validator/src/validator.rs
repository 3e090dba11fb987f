//! Cookie extraction and token verification

use axum::{
    extract::{Request, State},
    http::{header::COOKIE, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use std::sync::Arc;
use tracing::debug;

use crate::{Claims, Clock, SessionError, SystemClock};

/// Cookie name used when the configuration leaves it empty.
pub const DEFAULT_COOKIE_NAME: &str = "app_session";

/// Inputs needed to validate sessions.
#[derive(Clone)]
pub struct ValidatorConfig {
    pub signing_key: Vec<u8>,
    pub issuer: String,
    pub cookie_name: String,
}

/// Validates session cookies against a signing key and issuer.
pub struct SessionValidator {
    decoding_key: DecodingKey,
    issuer: String,
    cookie_name: String,
    clock: Arc<dyn Clock>,
}

impl SessionValidator {
    pub fn new(config: ValidatorConfig) -> Result<Self, SessionError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: ValidatorConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SessionError> {
        if config.signing_key.is_empty() {
            return Err(SessionError::MissingSigningKey);
        }
        if config.issuer.trim().is_empty() {
            return Err(SessionError::MissingIssuer);
        }
        let cookie_name = if config.cookie_name.trim().is_empty() {
            DEFAULT_COOKIE_NAME.to_string()
        } else {
            config.cookie_name
        };

        Ok(Self {
            decoding_key: DecodingKey::from_secret(&config.signing_key),
            issuer: config.issuer,
            cookie_name,
            clock,
        })
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims, SessionError> {
        verify_token(token, &self.decoding_key, &self.issuer, self.clock.as_ref())
    }

    /// Reads the session cookie from `headers` and validates it.
    pub fn validate_request(&self, headers: &HeaderMap) -> Result<Claims, SessionError> {
        let token = cookie_value(headers, &self.cookie_name)
            .filter(|value| !value.trim().is_empty())
            .ok_or(SessionError::MissingCookie)?;
        self.validate_token(&token)
    }
}

/// Verifies a session token.
///
/// Only HS256 is accepted. Time checks use `clock`, never the wall clock, and
/// run after the signature and issuer checks.
pub fn verify_token(
    token: &str,
    key: &DecodingKey,
    issuer: &str,
    clock: &dyn Clock,
) -> Result<Claims, SessionError> {
    if token.trim().is_empty() {
        return Err(SessionError::MissingToken);
    }

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.required_spec_claims = ["exp", "iat", "nbf", "iss"]
        .into_iter()
        .map(String::from)
        .collect();

    let claims = decode::<Claims>(token, key, &validation)
        .map_err(|e| {
            debug!(error = %e, "Session token failed signature or format checks");
            SessionError::InvalidToken
        })?
        .claims;

    if claims.iss != issuer {
        return Err(SessionError::InvalidIssuer);
    }

    let now = clock.now().timestamp();
    if now >= claims.exp {
        return Err(SessionError::Expired);
    }
    if now < claims.nbf || now < claims.iat {
        return Err(SessionError::NotYetValid);
    }

    Ok(claims)
}

/// Returns the value of cookie `name`, searching every `Cookie` header.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (key, val) = pair.trim().split_once('=')?;
            (key.trim() == name).then(|| val.trim().to_string())
        })
}

/// Axum middleware: rejects the request with 401 unless it carries a valid
/// session cookie, otherwise stores the [`Claims`] in the request extensions.
pub async fn require_session(
    State(validator): State<Arc<SessionValidator>>,
    mut request: Request,
    next: Next,
) -> Response {
    match validator.validate_request(request.headers()) {
        Ok(claims) => {
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Err(e) => {
            debug!(error = %e, path = %request.uri().path(), "Session rejected");
            StatusCode::UNAUTHORIZED.into_response()
        }
    }
}
