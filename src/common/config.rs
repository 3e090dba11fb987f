// src/common/config.rs
//! Server configuration
//!
//! Built once at startup through [`ServerConfigBuilder::build`], which rejects
//! empty secrets and non-positive TTLs. The resulting [`ServerConfig`] is
//! immutable and handed to every component explicitly.

use chrono::Duration;
use std::env;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(&'static str),

    #[error("invalid value for {field}: {value}")]
    Invalid { field: &'static str, value: String },

    #[error("{0} must be positive")]
    NonPositiveTtl(&'static str),
}

/// SameSite attribute written on every auth cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

#[derive(Clone)]
pub struct ServerConfig {
    google_client_id: String,
    signing_key: Vec<u8>,
    issuer: String,
    cookie_domain: Option<String>,
    session_cookie_name: String,
    refresh_cookie_name: String,
    session_ttl: Duration,
    refresh_ttl: Duration,
    nonce_ttl: Duration,
    same_site: SameSite,
    allow_insecure_http: bool,
}

// Keeps the signing key out of logs.
impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("google_client_id", &self.google_client_id)
            .field("signing_key", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("cookie_domain", &self.cookie_domain)
            .field("session_cookie_name", &self.session_cookie_name)
            .field("refresh_cookie_name", &self.refresh_cookie_name)
            .field("session_ttl", &self.session_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("nonce_ttl", &self.nonce_ttl)
            .field("same_site", &self.same_site)
            .field("allow_insecure_http", &self.allow_insecure_http)
            .finish()
    }
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut builder = Self::builder()
            .google_client_id(env::var("GOOGLE_CLIENT_ID").unwrap_or_default())
            .signing_key(env::var("JWT_SIGNING_KEY").unwrap_or_default().into_bytes());

        if let Ok(issuer) = env::var("JWT_ISSUER") {
            builder = builder.issuer(issuer);
        }

        // COOKIE_DOMAIN - empty means host-only cookies
        if let Ok(domain) = env::var("COOKIE_DOMAIN") {
            builder = builder.cookie_domain(domain);
        }

        if let Ok(name) = env::var("SESSION_COOKIE_NAME") {
            builder = builder.session_cookie_name(name);
        }
        if let Ok(name) = env::var("REFRESH_COOKIE_NAME") {
            builder = builder.refresh_cookie_name(name);
        }

        if let Some(secs) = env_seconds("SESSION_TTL_SECONDS")? {
            builder = builder.session_ttl(Duration::seconds(secs));
        }
        if let Some(secs) = env_seconds("REFRESH_TTL_SECONDS")? {
            builder = builder.refresh_ttl(Duration::seconds(secs));
        }
        if let Some(secs) = env_seconds("NONCE_TTL_SECONDS")? {
            builder = builder.nonce_ttl(Duration::seconds(secs));
        }

        // ENABLE_CORS - cross-origin deployments need SameSite=None
        if env_flag("ENABLE_CORS") {
            builder = builder.same_site(SameSite::None);
        }

        builder = builder.allow_insecure_http(env_flag("DEV_INSECURE_HTTP"));

        builder.build()
    }

    pub fn google_client_id(&self) -> &str {
        &self.google_client_id
    }

    pub fn signing_key(&self) -> &[u8] {
        &self.signing_key
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn cookie_domain(&self) -> Option<&str> {
        self.cookie_domain.as_deref()
    }

    pub fn session_cookie_name(&self) -> &str {
        &self.session_cookie_name
    }

    pub fn refresh_cookie_name(&self) -> &str {
        &self.refresh_cookie_name
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    pub fn nonce_ttl(&self) -> Duration {
        self.nonce_ttl
    }

    pub fn same_site(&self) -> SameSite {
        self.same_site
    }

    pub fn allow_insecure_http(&self) -> bool {
        self.allow_insecure_http
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfigBuilder {
    google_client_id: String,
    signing_key: Vec<u8>,
    issuer: String,
    cookie_domain: Option<String>,
    session_cookie_name: String,
    refresh_cookie_name: String,
    session_ttl: Duration,
    refresh_ttl: Duration,
    nonce_ttl: Duration,
    same_site: SameSite,
    allow_insecure_http: bool,
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self {
            google_client_id: String::new(),
            signing_key: Vec::new(),
            issuer: "tauth".to_string(),
            cookie_domain: None,
            session_cookie_name: "app_session".to_string(),
            refresh_cookie_name: "app_refresh".to_string(),
            session_ttl: Duration::minutes(15),
            refresh_ttl: Duration::days(60),
            nonce_ttl: Duration::minutes(5),
            same_site: SameSite::Strict,
            allow_insecure_http: false,
        }
    }
}

impl ServerConfigBuilder {
    pub fn google_client_id(mut self, value: impl Into<String>) -> Self {
        self.google_client_id = value.into();
        self
    }

    pub fn signing_key(mut self, value: impl Into<Vec<u8>>) -> Self {
        self.signing_key = value.into();
        self
    }

    pub fn issuer(mut self, value: impl Into<String>) -> Self {
        self.issuer = value.into();
        self
    }

    pub fn cookie_domain(mut self, value: impl Into<String>) -> Self {
        let value = value.into();
        self.cookie_domain = if value.trim().is_empty() {
            None
        } else {
            Some(value.trim().to_string())
        };
        self
    }

    pub fn session_cookie_name(mut self, value: impl Into<String>) -> Self {
        self.session_cookie_name = value.into();
        self
    }

    pub fn refresh_cookie_name(mut self, value: impl Into<String>) -> Self {
        self.refresh_cookie_name = value.into();
        self
    }

    pub fn session_ttl(mut self, value: Duration) -> Self {
        self.session_ttl = value;
        self
    }

    pub fn refresh_ttl(mut self, value: Duration) -> Self {
        self.refresh_ttl = value;
        self
    }

    pub fn nonce_ttl(mut self, value: Duration) -> Self {
        self.nonce_ttl = value;
        self
    }

    pub fn same_site(mut self, value: SameSite) -> Self {
        self.same_site = value;
        self
    }

    pub fn allow_insecure_http(mut self, value: bool) -> Self {
        self.allow_insecure_http = value;
        self
    }

    pub fn build(self) -> Result<ServerConfig, ConfigError> {
        if self.google_client_id.trim().is_empty() {
            return Err(ConfigError::Missing("GOOGLE_CLIENT_ID"));
        }
        if self.signing_key.is_empty() {
            return Err(ConfigError::Missing("JWT_SIGNING_KEY"));
        }
        if self.issuer.trim().is_empty() {
            return Err(ConfigError::Missing("JWT_ISSUER"));
        }
        if self.session_cookie_name.trim().is_empty() {
            return Err(ConfigError::Missing("SESSION_COOKIE_NAME"));
        }
        if self.refresh_cookie_name.trim().is_empty() {
            return Err(ConfigError::Missing("REFRESH_COOKIE_NAME"));
        }
        if self.session_cookie_name == self.refresh_cookie_name {
            return Err(ConfigError::Invalid {
                field: "REFRESH_COOKIE_NAME",
                value: self.refresh_cookie_name,
            });
        }
        if self.session_ttl <= Duration::zero() {
            return Err(ConfigError::NonPositiveTtl("SESSION_TTL_SECONDS"));
        }
        if self.refresh_ttl <= Duration::zero() {
            return Err(ConfigError::NonPositiveTtl("REFRESH_TTL_SECONDS"));
        }
        if self.nonce_ttl <= Duration::zero() {
            return Err(ConfigError::NonPositiveTtl("NONCE_TTL_SECONDS"));
        }

        Ok(ServerConfig {
            google_client_id: self.google_client_id.trim().to_string(),
            signing_key: self.signing_key,
            issuer: self.issuer.trim().to_string(),
            cookie_domain: self.cookie_domain,
            session_cookie_name: self.session_cookie_name,
            refresh_cookie_name: self.refresh_cookie_name,
            session_ttl: self.session_ttl,
            refresh_ttl: self.refresh_ttl,
            nonce_ttl: self.nonce_ttl,
            same_site: self.same_site,
            allow_insecure_http: self.allow_insecure_http,
        })
    }
}

/// Reads an integer number of seconds from `key`, if set.
fn env_seconds(key: &'static str) -> Result<Option<i64>, ConfigError> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                field: key,
                value: raw,
            }),
        _ => Ok(None),
    }
}

pub fn env_flag(key: &str) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}
