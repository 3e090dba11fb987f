//! Authentication routes

use axum::{
    extract::Extension,
    middleware,
    routing::{get, post},
    Router,
};
use session_validator::require_session;
use std::sync::Arc;

use super::handlers;
use crate::common::AppState;

/// Creates and returns the authentication router
///
/// # Routes
/// - `POST /auth/nonce` - Issue a login nonce
/// - `POST /auth/google` - Exchange a Google ID token for cookies
/// - `POST /auth/refresh` - Rotate the refresh cookie
/// - `POST /auth/logout` - Revoke and clear cookies
/// - `GET /me` - Current user, requires a session cookie
pub fn auth_routes(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/me", get(handlers::me_handler))
        .route_layer(middleware::from_fn_with_state(
            state.validator.clone(),
            require_session,
        ));

    Router::new()
        .route("/auth/nonce", post(handlers::nonce_handler))
        .route("/auth/google", post(handlers::google_auth))
        .route("/auth/refresh", post(handlers::refresh_handler))
        .route("/auth/logout", post(handlers::logout_handler))
        .merge(protected)
        .layer(Extension(state))
}
