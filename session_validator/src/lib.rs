//! # Session Validator
//!
//! Verifies the session cookie minted by the tauth service. Other services can
//! depend on this crate alone: the signing key, the issuer string and the cookie
//! name are all that is needed to authenticate a request.
//!
//! Validated claims are stored in the request extensions, keyed by the
//! [`Claims`] type itself. Handlers behind [`require_session`] can take
//! `Claims` as an extractor argument.

mod claims;
mod clock;
mod error;
mod validator;

pub use claims::Claims;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::SessionError;
pub use validator::{
    cookie_value, require_session, verify_token, SessionValidator, ValidatorConfig,
    DEFAULT_COOKIE_NAME,
};
