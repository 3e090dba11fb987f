//! Login, refresh and logout
//!
//! Every step runs in order and the first failure ends the operation. Cookies
//! are only produced once every step has succeeded, so a failed or cancelled
//! request never hands out a partial session.

use chrono::{DateTime, Utc};
use serde::Serialize;
use session_validator::Clock;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::binding::{bind_identity, BindingError};
use super::cookies;
use super::jwt::{mint_session_token, SessionIdentity, SessionTokenError};
use super::metrics::{
    MetricsRecorder, NoopMetrics, LOGIN_FAILURE, LOGIN_SUCCESS, LOGOUT_SUCCESS, REFRESH_FAILURE,
    REFRESH_SUCCESS,
};
use super::nonce::{NonceError, NonceStore};
use super::refresh::{RefreshErrorKind, RefreshStoreError, RefreshTokenStore};
use crate::common::config::ServerConfig;
use crate::common::{safe_email_log, safe_token_log, ApiError};
use crate::services::identity::{IdentityError, IdentityVerifier};
use crate::services::users::{UserProfileStore, UserStoreError};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("malformed request body")]
    InvalidJson,
    #[error("missing google_id_token")]
    MissingIdToken,
    #[error("missing nonce_token")]
    MissingNonce,
    #[error("nonce rejected: {0}")]
    InvalidNonce(#[source] NonceError),
    #[error("failed to issue nonce: {0}")]
    NonceIssue(#[source] NonceError),
    #[error("login requires https")]
    HttpsRequired,
    #[error(transparent)]
    Identity(IdentityError),
    #[error("identity binding failed: {0}")]
    Binding(#[source] BindingError),
    #[error("user store failed: {0}")]
    UserStore(#[source] UserStoreError),
    #[error("failed to mint session token: {0}")]
    Mint(#[source] SessionTokenError),
    #[error("failed to issue refresh token: {0}")]
    IssueRefresh(#[source] RefreshStoreError),
    #[error("missing refresh cookie")]
    MissingRefreshCookie,
    #[error("refresh token rejected: {0}")]
    InvalidRefresh(#[source] RefreshStoreError),
    #[error("profile unavailable: {0}")]
    ProfileUnavailable(#[source] UserStoreError),
    #[error("failed to revoke previous refresh token: {0}")]
    RevokePrevious(#[source] RefreshStoreError),
}

impl AuthError {
    /// Stable cause, used as the log code suffix and the response `error`.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidJson => "invalid_json",
            AuthError::MissingIdToken => "missing_token",
            AuthError::MissingNonce => "missing_nonce",
            AuthError::InvalidNonce(_) => "invalid_nonce_token",
            AuthError::NonceIssue(_) => "issue_nonce",
            AuthError::HttpsRequired => "https_required",
            AuthError::Identity(IdentityError::Rejected(_)) => "invalid_google_token",
            AuthError::Identity(IdentityError::Transport(_)) => "google_unavailable",
            AuthError::Binding(BindingError::InvalidIssuer) => "invalid_issuer",
            AuthError::Binding(BindingError::UnverifiedIdentity) => "unverified_identity",
            AuthError::Binding(BindingError::NonceMismatch) => "nonce_mismatch",
            AuthError::UserStore(_) => "user_store",
            AuthError::Mint(_) => "mint_jwt",
            AuthError::IssueRefresh(_) => "issue_refresh",
            AuthError::MissingRefreshCookie => "missing_cookie",
            AuthError::InvalidRefresh(e) if e.kind() == RefreshErrorKind::Expired => "expired",
            AuthError::InvalidRefresh(_) => "validate",
            AuthError::ProfileUnavailable(_) => "profile",
            AuthError::RevokePrevious(_) => "revoke_previous",
        }
    }

    /// Infrastructure failures, as opposed to bad input or bad credentials.
    pub fn is_internal(&self) -> bool {
        match self {
            AuthError::NonceIssue(_)
            | AuthError::Identity(IdentityError::Transport(_))
            | AuthError::UserStore(_)
            | AuthError::Mint(_)
            | AuthError::IssueRefresh(_)
            | AuthError::RevokePrevious(_) => true,
            AuthError::InvalidRefresh(e) => e.kind() == RefreshErrorKind::Storage,
            _ => false,
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let cause = err.code().to_string();
        if err.is_internal() {
            return ApiError::InternalServer(cause);
        }
        match err {
            AuthError::InvalidJson
            | AuthError::MissingIdToken
            | AuthError::MissingNonce
            | AuthError::HttpsRequired => ApiError::BadRequest(cause),
            _ => ApiError::Unauthorized(cause),
        }
    }
}

/// Public part of a signed-in user, returned by login.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionUser {
    pub user_id: String,
    pub user_email: String,
    pub display: String,
    pub avatar_url: String,
    pub roles: Vec<String>,
}

#[derive(Debug)]
pub struct LoginOutcome {
    pub user: SessionUser,
    /// Set-Cookie values: session first, then refresh
    pub cookies: Vec<String>,
}

pub struct AuthService {
    config: Arc<ServerConfig>,
    clock: Arc<dyn Clock>,
    nonces: Arc<dyn NonceStore>,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    users: Arc<dyn UserProfileStore>,
    verifier: Arc<dyn IdentityVerifier>,
    metrics: Arc<dyn MetricsRecorder>,
}

impl AuthService {
    pub fn new(
        config: Arc<ServerConfig>,
        clock: Arc<dyn Clock>,
        nonces: Arc<dyn NonceStore>,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        users: Arc<dyn UserProfileStore>,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> Self {
        Self {
            config,
            clock,
            nonces,
            refresh_tokens,
            users,
            verifier,
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub async fn issue_nonce(&self) -> Result<String, AuthError> {
        self.nonces.issue().await.map_err(|e| {
            let err = AuthError::NonceIssue(e);
            log_failure("nonce", &err);
            err
        })
    }

    /// Exchanges a Google ID token for session and refresh cookies.
    ///
    /// `https` is the caller's view of the transport; plain HTTP is refused
    /// unless the configuration allows it.
    pub async fn login(
        &self,
        google_id_token: &str,
        nonce_token: &str,
        https: bool,
    ) -> Result<LoginOutcome, AuthError> {
        match self.try_login(google_id_token, nonce_token, https).await {
            Ok(outcome) => {
                self.metrics.increment(LOGIN_SUCCESS);
                info!(
                    user_id = %outcome.user.user_id,
                    email = %safe_email_log(&outcome.user.user_email),
                    "User signed in"
                );
                Ok(outcome)
            }
            Err(err) => Err(self.login_failed(err)),
        }
    }

    /// Logs and counts a rejected login. Also used by the handler for bodies
    /// that never reach [`AuthService::login`].
    pub fn login_failed(&self, err: AuthError) -> AuthError {
        self.metrics.increment(LOGIN_FAILURE);
        log_failure("login", &err);
        err
    }

    async fn try_login(
        &self,
        google_id_token: &str,
        nonce_token: &str,
        https: bool,
    ) -> Result<LoginOutcome, AuthError> {
        let google_id_token = google_id_token.trim();
        let nonce_token = nonce_token.trim();
        if google_id_token.is_empty() {
            return Err(AuthError::MissingIdToken);
        }
        if nonce_token.is_empty() {
            return Err(AuthError::MissingNonce);
        }

        self.nonces
            .consume(nonce_token)
            .await
            .map_err(AuthError::InvalidNonce)?;

        if !https && !self.config.allow_insecure_http() {
            return Err(AuthError::HttpsRequired);
        }

        let claims = self
            .verifier
            .validate(google_id_token, self.config.google_client_id())
            .await
            .map_err(AuthError::Identity)?;

        let identity = bind_identity(&claims, nonce_token).map_err(AuthError::Binding)?;

        let (user_id, roles) = self
            .users
            .upsert_by_subject(
                &identity.subject,
                &identity.email,
                &identity.display_name,
                &identity.avatar_url,
            )
            .await
            .map_err(AuthError::UserStore)?;

        let session = SessionIdentity {
            user_id,
            email: identity.email,
            display_name: identity.display_name,
            avatar_url: identity.avatar_url,
            roles,
        };
        let cookies = self.issue_session(&session, "").await?;

        Ok(LoginOutcome {
            user: SessionUser {
                user_id: session.user_id,
                user_email: session.email,
                display: session.display_name,
                avatar_url: session.avatar_url,
                roles: session.roles,
            },
            cookies,
        })
    }

    /// Rotates the refresh token in `refresh_cookie` and mints a new session.
    /// Returns the Set-Cookie values.
    pub async fn refresh(&self, refresh_cookie: Option<&str>) -> Result<Vec<String>, AuthError> {
        match self.try_refresh(refresh_cookie).await {
            Ok(cookies) => {
                self.metrics.increment(REFRESH_SUCCESS);
                Ok(cookies)
            }
            Err(err) => {
                self.metrics.increment(REFRESH_FAILURE);
                log_failure("refresh", &err);
                Err(err)
            }
        }
    }

    async fn try_refresh(&self, refresh_cookie: Option<&str>) -> Result<Vec<String>, AuthError> {
        let opaque = refresh_cookie
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(AuthError::MissingRefreshCookie)?;

        let current = self
            .refresh_tokens
            .validate(opaque)
            .await
            .map_err(AuthError::InvalidRefresh)?;

        let profile = self
            .users
            .get_profile(&current.user_id)
            .await
            .map_err(AuthError::ProfileUnavailable)?;

        let session = SessionIdentity {
            user_id: profile.user_id,
            email: profile.email,
            display_name: profile.display_name,
            avatar_url: profile.avatar_url,
            roles: profile.roles,
        };
        let cookies = self.issue_session(&session, &current.token_id).await?;

        match self.refresh_tokens.revoke(&current.token_id).await {
            Ok(()) => {}
            Err(e) if e.kind() == RefreshErrorKind::AlreadyRevoked => {
                debug!(token_id = %current.token_id, "Previous refresh token was already revoked");
            }
            // the new token stays in storage unused until it expires
            Err(e) => return Err(AuthError::RevokePrevious(e)),
        }

        debug!(
            user_id = %session.user_id,
            previous_token_id = %current.token_id,
            "Rotated refresh token"
        );
        Ok(cookies)
    }

    /// Revokes the refresh token if there is one and clears both cookies.
    /// Never fails.
    pub async fn logout(&self, refresh_cookie: Option<&str>) -> Vec<String> {
        if let Some(opaque) = refresh_cookie.map(str::trim).filter(|v| !v.is_empty()) {
            self.revoke_quietly(opaque).await;
        }

        self.metrics.increment(LOGOUT_SUCCESS);
        vec![
            cookies::clear_session_cookie(&self.config),
            cookies::clear_refresh_cookie(&self.config),
        ]
    }

    async fn revoke_quietly(&self, opaque: &str) {
        let current = match self.refresh_tokens.validate(opaque).await {
            Ok(current) => current,
            Err(e) => {
                debug!(
                    code = "auth.logout.validate",
                    token = %safe_token_log(opaque),
                    error = %e,
                    "Logout with unusable refresh token"
                );
                return;
            }
        };

        match self.refresh_tokens.revoke(&current.token_id).await {
            Ok(()) => {}
            Err(e) if e.kind() == RefreshErrorKind::AlreadyRevoked => {}
            Err(e) => warn!(
                code = "auth.logout.revoke",
                token_id = %current.token_id,
                error = %e,
                "Failed to revoke refresh token on logout"
            ),
        }
    }

    /// Mints a session token and a refresh token chained to `previous_token_id`.
    async fn issue_session(
        &self,
        identity: &SessionIdentity,
        previous_token_id: &str,
    ) -> Result<Vec<String>, AuthError> {
        let now = self.clock.now();

        let (token, session_expires) = mint_session_token(
            self.clock.as_ref(),
            identity,
            self.config.issuer(),
            self.config.signing_key(),
            self.config.session_ttl(),
        )
        .map_err(AuthError::Mint)?;

        let refresh_expires: DateTime<Utc> = now + self.config.refresh_ttl();
        let issued = self
            .refresh_tokens
            .issue(
                &identity.user_id,
                refresh_expires.timestamp(),
                previous_token_id,
            )
            .await
            .map_err(AuthError::IssueRefresh)?;

        Ok(vec![
            cookies::session_cookie(&self.config, &token, session_expires, now),
            cookies::refresh_cookie(&self.config, &issued.opaque, refresh_expires, now),
        ])
    }
}

fn log_failure(operation: &str, err: &AuthError) {
    let code = format!("auth.{operation}.{}", err.code());
    if err.is_internal() {
        error!(code = %code, error = %err, "Auth operation failed");
    } else {
        warn!(code = %code, error = %err, "Auth request rejected");
    }
}
