//! Authentication handlers

use axum::{
    extract::{rejection::JsonRejection, Extension, Json},
    http::{header::SET_COOKIE, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::SecondsFormat;
use session_validator::cookie_value;
use std::sync::Arc;
use tracing::{error, warn};

use super::extractors::AuthedUser;
use super::models::{GoogleLoginRequest, MeResponse, NonceResponse};
use super::service::AuthError;
use crate::common::helpers::request_is_https;
use crate::common::{ApiError, AppState};
use crate::services::users::UserStoreError;

/// Appends one Set-Cookie header per value.
fn with_cookies(mut response: Response, cookies: Vec<String>) -> Result<Response, ApiError> {
    for cookie in cookies {
        let value = HeaderValue::from_str(&cookie).map_err(|e| {
            error!(error = %e, "Refusing to write malformed Set-Cookie header");
            ApiError::InternalServer("invalid_cookie".to_string())
        })?;
        response.headers_mut().append(SET_COOKIE, value);
    }
    Ok(response)
}

/// POST /auth/nonce
/// Issues a single-use nonce for the next Google sign-in
///
/// # Response
/// ```json
/// { "nonce": "<token>" }
/// ```
pub async fn nonce_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<NonceResponse>, ApiError> {
    let nonce = state.auth.issue_nonce().await?;
    Ok(Json(NonceResponse { nonce }))
}

/// POST /auth/google
/// Exchanges a Google ID token for session and refresh cookies
///
/// # Request Body
/// ```json
/// {
///   "google_id_token": "<google id token>",
///   "nonce_token": "<nonce from /auth/nonce>"
/// }
/// ```
///
/// # Response
/// ```json
/// { "user_id": "...", "user_email": "...", "display": "...", "avatar_url": "...", "roles": ["user"] }
/// ```
pub async fn google_auth(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<GoogleLoginRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload.map_err(|rejection| {
        warn!(error = %rejection, "Login body could not be parsed");
        state.auth.login_failed(AuthError::InvalidJson)
    })?;

    let outcome = state
        .auth
        .login(
            &payload.google_id_token,
            &payload.nonce_token,
            request_is_https(&headers),
        )
        .await?;

    with_cookies(Json(outcome.user).into_response(), outcome.cookies)
}

/// POST /auth/refresh
/// Rotates the refresh cookie and re-issues the session cookie
pub async fn refresh_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let refresh = cookie_value(&headers, state.config.refresh_cookie_name());
    let cookies = state.auth.refresh(refresh.as_deref()).await?;

    with_cookies(StatusCode::NO_CONTENT.into_response(), cookies)
}

/// POST /auth/logout
/// Revokes the refresh token, if any, and clears both cookies. Always 204.
pub async fn logout_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let refresh = cookie_value(&headers, state.config.refresh_cookie_name());
    let cookies = state.auth.logout(refresh.as_deref()).await;

    with_cookies(StatusCode::NO_CONTENT.into_response(), cookies)
}

/// GET /me
/// Returns the profile behind the current session
///
/// # Response
/// ```json
/// { "user_id": "...", "user_email": "...", "display": "...", "avatar_url": "...", "roles": ["user"], "expires": "..." }
/// ```
pub async fn me_handler(
    Extension(state): Extension<Arc<AppState>>,
    authed: AuthedUser,
) -> Result<Json<MeResponse>, ApiError> {
    let profile = match state.users.get_profile(&authed.id).await {
        Ok(profile) => profile,
        Err(UserStoreError::NotFound) => {
            warn!(
                code = "me.profile_missing",
                user_id = %authed.id,
                "Session refers to unknown user"
            );
            return Err(ApiError::NotFound("profile_not_found".to_string()));
        }
        Err(e) => {
            error!(
                code = "me.user_store",
                user_id = %authed.id,
                error = %e,
                "Profile lookup failed"
            );
            return Err(ApiError::InternalServer("user_store".to_string()));
        }
    };

    Ok(Json(MeResponse {
        user_id: profile.user_id,
        user_email: profile.email,
        display: profile.display_name,
        avatar_url: profile.avatar_url,
        roles: profile.roles,
        expires: authed
            .expires_at
            .to_rfc3339_opts(SecondsFormat::Secs, true),
    }))
}
