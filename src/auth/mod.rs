//! # Auth Module
//!
//! Google sign-in exchanged for first-party cookies:
//! - single-use nonces tying a Google ID token to one login attempt
//! - identity binding rules on top of Google's own verification
//! - signed session tokens and rotating, hashed-at-rest refresh tokens
//! - the login / refresh / logout protocol and its HTTP routes

pub mod binding;
pub mod cookies;
pub mod extractors;
pub mod handlers;
pub mod jwt;
pub mod metrics;
pub mod models;
pub mod nonce;
pub mod refresh;
pub mod routes;
pub mod service;

#[cfg(test)]
mod tests;

pub use extractors::AuthedUser;
pub use routes::auth_routes;
pub use service::{AuthError, AuthService};
