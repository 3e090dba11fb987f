//! Set-Cookie values for the session and refresh cookies

use chrono::{DateTime, Utc};

use crate::common::config::{SameSite, ServerConfig};

pub const SESSION_COOKIE_PATH: &str = "/";
/// The refresh cookie is only sent to the auth routes
pub const REFRESH_COOKIE_PATH: &str = "/auth";

fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn with_attributes(mut cookie: String, config: &ServerConfig) -> String {
    if let Some(domain) = config.cookie_domain() {
        cookie.push_str(&format!("; Domain={domain}"));
    }
    if !config.allow_insecure_http() || config.same_site() == SameSite::None {
        // browsers drop SameSite=None cookies that are not Secure
        cookie.push_str("; Secure");
    }
    cookie.push_str(&format!("; SameSite={}", config.same_site().as_str()));
    cookie
}

fn build(
    config: &ServerConfig,
    name: &str,
    value: &str,
    path: &str,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> String {
    let max_age = (expires_at - now).num_seconds().max(0);
    let cookie = format!(
        "{name}={value}; Path={path}; HttpOnly; Expires={}; Max-Age={max_age}",
        http_date(expires_at)
    );
    with_attributes(cookie, config)
}

pub fn session_cookie(
    config: &ServerConfig,
    token: &str,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> String {
    build(
        config,
        config.session_cookie_name(),
        token,
        SESSION_COOKIE_PATH,
        expires_at,
        now,
    )
}

pub fn refresh_cookie(
    config: &ServerConfig,
    opaque: &str,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> String {
    build(
        config,
        config.refresh_cookie_name(),
        opaque,
        REFRESH_COOKIE_PATH,
        expires_at,
        now,
    )
}

/// Expires cookie `name` on `path`, which must match the path it was set on.
pub fn clear_cookie(config: &ServerConfig, name: &str, path: &str) -> String {
    let cookie = format!(
        "{name}=; Path={path}; HttpOnly; Expires=Thu, 01 Jan 1970 00:00:00 GMT; Max-Age=0"
    );
    with_attributes(cookie, config)
}

pub fn clear_session_cookie(config: &ServerConfig) -> String {
    clear_cookie(config, config.session_cookie_name(), SESSION_COOKIE_PATH)
}

pub fn clear_refresh_cookie(config: &ServerConfig) -> String {
    clear_cookie(config, config.refresh_cookie_name(), REFRESH_COOKIE_PATH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn config() -> ServerConfig {
        ServerConfig::builder()
            .google_client_id("client")
            .signing_key(b"key".to_vec())
            .build()
            .unwrap()
    }

    #[test]
    fn test_session_cookie_attributes() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let cookie = session_cookie(&config(), "jwt", now + Duration::minutes(15), now);

        assert_eq!(
            cookie,
            "app_session=jwt; Path=/; HttpOnly; Expires=Mon, 01 Jan 2024 00:15:00 GMT; Max-Age=900; Secure; SameSite=Strict"
        );
    }

    #[test]
    fn test_refresh_cookie_is_scoped_to_auth_routes() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let cookie = refresh_cookie(&config(), "opaque", now + Duration::days(1), now);

        assert!(cookie.starts_with("app_refresh=opaque; Path=/auth; HttpOnly;"));
        assert!(cookie.contains("Max-Age=86400"));
    }

    #[test]
    fn test_insecure_http_drops_secure() {
        let config = ServerConfig::builder()
            .google_client_id("client")
            .signing_key(b"key".to_vec())
            .allow_insecure_http(true)
            .cookie_domain("example.com")
            .build()
            .unwrap();
        let cookie = clear_session_cookie(&config);

        assert!(!cookie.contains("Secure"));
        assert!(cookie.contains("Domain=example.com"));
        assert!(cookie.contains("Max-Age=0"));
    }

    #[test]
    fn test_same_site_none_stays_secure() {
        let config = ServerConfig::builder()
            .google_client_id("client")
            .signing_key(b"key".to_vec())
            .allow_insecure_http(true)
            .same_site(SameSite::None)
            .build()
            .unwrap();
        let cookie = clear_refresh_cookie(&config);

        assert!(cookie.starts_with("app_refresh=; Path=/auth;"));
        assert!(cookie.contains("; Secure; SameSite=None"));
    }
}
