use thiserror::Error;

/// Reasons a session cannot be accepted.
///
/// The display strings are stable and safe to use as log codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session.validator.missing_signing_key")]
    MissingSigningKey,
    #[error("session.validator.missing_issuer")]
    MissingIssuer,
    #[error("session.validator.missing_token")]
    MissingToken,
    #[error("session.validator.missing_cookie")]
    MissingCookie,
    #[error("session.validator.invalid_token")]
    InvalidToken,
    #[error("session.validator.invalid_issuer")]
    InvalidIssuer,
    #[error("session.validator.expired")]
    Expired,
    #[error("session.validator.not_yet_valid")]
    NotYetValid,
}
