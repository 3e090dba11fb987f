//! Rules applied on top of the identity provider's own verification

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::services::identity::IdentityClaims;

/// Both spellings Google uses for its issuer
pub const ACCEPTED_ISSUERS: [&str; 2] = ["https://accounts.google.com", "accounts.google.com"];

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BindingError {
    #[error("invalid_issuer")]
    InvalidIssuer,
    #[error("unverified_identity")]
    UnverifiedIdentity,
    #[error("nonce_mismatch")]
    NonceMismatch,
}

/// Identity that passed every binding rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundIdentity {
    pub subject: String,
    pub email: String,
    pub display_name: String,
    pub avatar_url: String,
}

/// SHA-256 of `value`, URL-safe base64 without padding.
pub fn hash_opaque(value: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(value.as_bytes()))
}

/// Checks issuer, then verified identity, then the nonce. First failure wins.
///
/// The nonce claim may carry the raw token or its hash; both are accepted.
pub fn bind_identity(
    claims: &IdentityClaims,
    nonce_token: &str,
) -> Result<BoundIdentity, BindingError> {
    if !ACCEPTED_ISSUERS.contains(&claims.issuer.as_str()) {
        return Err(BindingError::InvalidIssuer);
    }

    if claims.subject.is_empty() || claims.email.is_empty() || !claims.email_verified {
        return Err(BindingError::UnverifiedIdentity);
    }

    let nonce_claim = claims.nonce.as_str();
    if nonce_claim.is_empty()
        || nonce_token.is_empty()
        || (nonce_claim != nonce_token && nonce_claim != hash_opaque(nonce_token))
    {
        return Err(BindingError::NonceMismatch);
    }

    Ok(BoundIdentity {
        subject: claims.subject.clone(),
        email: claims.email.clone(),
        display_name: claims.display_name.clone(),
        avatar_url: claims.avatar_url.clone(),
    })
}
