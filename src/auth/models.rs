//! Authentication request and response bodies

use serde::{Deserialize, Serialize};

/// Body of `POST /auth/google`. Missing fields are reported as 400 by the
/// login flow itself rather than by the JSON extractor.
#[derive(Debug, Deserialize)]
pub struct GoogleLoginRequest {
    #[serde(default)]
    pub google_id_token: String,
    #[serde(default)]
    pub nonce_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NonceResponse {
    pub nonce: String,
}

/// Body of `GET /me`
#[derive(Debug, Serialize, Deserialize)]
pub struct MeResponse {
    pub user_id: String,
    pub user_email: String,
    pub display: String,
    pub avatar_url: String,
    pub roles: Vec<String>,
    /// Session expiry, RFC 3339
    pub expires: String,
}
