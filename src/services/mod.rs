// src/services/mod.rs
//
// Collaborators the auth flow talks to: the identity provider and the
// user profile store

pub mod identity;
pub mod users;

// Re-export commonly used types for convenience
pub use identity::{GoogleTokenInfoVerifier, IdentityVerifier};
pub use users::{InMemoryUsers, SqliteUserStore, UserProfileStore};
