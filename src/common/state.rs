// Application state shared across all handlers

use session_validator::SessionValidator;
use std::sync::Arc;

use crate::auth::AuthService;
use crate::common::config::ServerConfig;
use crate::services::users::UserProfileStore;

/// Everything a handler needs. Built once in `main`; nothing in here is
/// mutated afterwards.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub validator: Arc<SessionValidator>,
    pub users: Arc<dyn UserProfileStore>,
    pub config: Arc<ServerConfig>,
}
