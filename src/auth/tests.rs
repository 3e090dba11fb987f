//! Tests for auth module
//!
//! These drive the full router with a stubbed Google verifier and a manual
//! clock:
//! - nonce, login, /me, refresh and logout end to end
//! - status codes for rejected requests
//! - session expiry after logout

#[cfg(test)]
mod tests {
    use super::super::*;
    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        response::Response,
        Router,
    };
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::{json, Value};
    use session_validator::{ManualClock, SessionValidator, ValidatorConfig};
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;

    use crate::auth::jwt::{mint_session_token, SessionIdentity};
    use crate::auth::nonce::MemoryNonceStore;
    use crate::auth::refresh::{MemoryRefreshStore, RefreshErrorKind, RefreshTokenStore};
    use crate::common::{AppState, ServerConfig};
    use crate::services::identity::{IdentityClaims, IdentityError, IdentityVerifier};
    use crate::services::users::InMemoryUsers;

    const CLIENT_ID: &str = "client.apps.googleusercontent.com";
    const KEY: &[u8] = b"router-test-signing-key";

    /// Answers every token with the claims it holds, nonce included.
    struct FakeGoogle {
        claims: Mutex<IdentityClaims>,
    }

    #[async_trait]
    impl IdentityVerifier for FakeGoogle {
        async fn validate(
            &self,
            id_token: &str,
            audience: &str,
        ) -> Result<IdentityClaims, IdentityError> {
            if audience != CLIENT_ID || id_token == "forged" {
                return Err(IdentityError::Rejected("tokeninfo status 400".to_string()));
            }
            Ok(self.claims.lock().unwrap().clone())
        }
    }

    struct TestApp {
        router: Router,
        clock: Arc<ManualClock>,
        google: Arc<FakeGoogle>,
        refresh: Arc<MemoryRefreshStore>,
    }

    fn test_app() -> TestApp {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap(),
        ));
        let config = Arc::new(
            ServerConfig::builder()
                .google_client_id(CLIENT_ID)
                .signing_key(KEY.to_vec())
                .build()
                .unwrap(),
        );
        let google = Arc::new(FakeGoogle {
            claims: Mutex::new(IdentityClaims {
                issuer: "accounts.google.com".to_string(),
                subject: "1234567890".to_string(),
                email: "ada@example.com".to_string(),
                email_verified: true,
                display_name: "Ada Lovelace".to_string(),
                avatar_url: "https://example.com/ada.png".to_string(),
                nonce: String::new(),
            }),
        });
        let refresh = Arc::new(MemoryRefreshStore::new(clock.clone()));
        let users = Arc::new(InMemoryUsers::new());

        let auth = AuthService::new(
            config.clone(),
            clock.clone(),
            Arc::new(MemoryNonceStore::new(config.nonce_ttl(), clock.clone())),
            refresh.clone(),
            users.clone(),
            google.clone(),
        );
        let validator = SessionValidator::with_clock(
            ValidatorConfig {
                signing_key: KEY.to_vec(),
                issuer: config.issuer().to_string(),
                cookie_name: config.session_cookie_name().to_string(),
            },
            clock.clone(),
        )
        .unwrap();

        let state = Arc::new(AppState {
            auth: Arc::new(auth),
            validator: Arc::new(validator),
            users,
            config,
        });

        TestApp {
            router: auth_routes(state),
            clock,
            google,
            refresh,
        }
    }

    impl TestApp {
        async fn send(&self, request: Request<Body>) -> Response {
            self.router.clone().oneshot(request).await.unwrap()
        }

        async fn nonce(&self) -> String {
            let response = self.send(post("/auth/nonce", None, Body::empty())).await;
            assert_eq!(response.status(), StatusCode::OK);
            body_json(response).await["nonce"].as_str().unwrap().to_string()
        }

        async fn login(&self) -> Response {
            let nonce = self.nonce().await;
            self.google.claims.lock().unwrap().nonce = nonce.clone();
            self.send(login_request(&nonce)).await
        }
    }

    fn post(uri: &str, cookie: Option<&str>, body: Body) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::HOST, "auth.example.com")
            .header("x-forwarded-proto", "https");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(body).unwrap()
    }

    fn get_me(cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/me");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn login_request(nonce: &str) -> Request<Body> {
        let body = json!({ "google_id_token": "google-jwt", "nonce_token": nonce });
        let mut request = post("/auth/google", None, Body::from(body.to_string()));
        request.headers_mut().insert(
            header::CONTENT_TYPE,
            "application/json".parse().unwrap(),
        );
        request
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// `name=value` pair of the Set-Cookie header for `name`.
    fn set_cookie(response: &Response, name: &str) -> String {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.starts_with(&format!("{name}=")))
            .and_then(|v| v.split(';').next())
            .map(str::to_string)
            .unwrap_or_else(|| panic!("no Set-Cookie for {name}"))
    }

    #[tokio::test]
    async fn test_end_to_end_session_lifecycle() {
        let app = test_app();

        // login
        let response = app.login().await;
        assert_eq!(response.status(), StatusCode::OK);
        let session = set_cookie(&response, "app_session");
        let refresh = set_cookie(&response, "app_refresh");
        let user = body_json(response).await;
        assert_eq!(user["user_id"], "google:1234567890");
        assert_eq!(user["user_email"], "ada@example.com");
        assert_eq!(user["display"], "Ada Lovelace");
        assert_eq!(user["roles"], json!(["user"]));

        // /me with the session cookie
        let response = app.send(get_me(Some(&session))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let me = body_json(response).await;
        assert_eq!(me["user_id"], user["user_id"]);
        assert_eq!(me["expires"], "2024-06-01T08:15:00Z");

        // refresh rotates the refresh cookie
        app.clock.advance(Duration::minutes(5));
        let response = app.send(post("/auth/refresh", Some(&refresh), Body::empty())).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let rotated = set_cookie(&response, "app_refresh");
        let new_session = set_cookie(&response, "app_session");
        assert_ne!(rotated, refresh);
        assert_ne!(new_session, session);

        let old_opaque = refresh.trim_start_matches("app_refresh=");
        let err = app.refresh.validate(old_opaque).await.unwrap_err();
        assert_eq!(err.kind(), RefreshErrorKind::Revoked);

        // logout clears both cookies
        let response = app.send(post("/auth/logout", Some(&rotated), Body::empty())).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let cleared: Vec<&str> = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        assert_eq!(cleared.len(), 2);
        assert!(cleared.iter().all(|c| c.contains("Max-Age=0")));

        let response = app.send(post("/auth/refresh", Some(&rotated), Body::empty())).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // the access token outlives logout until its own expiry
        let response = app.send(get_me(Some(&new_session))).await;
        assert_eq!(response.status(), StatusCode::OK);

        app.clock.advance(Duration::minutes(16));
        let response = app.send(get_me(Some(&new_session))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_me_requires_session() {
        let app = test_app();
        let response = app.send(get_me(None)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app.send(get_me(Some("app_session=not-a-jwt"))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_me_with_tampered_cookie() {
        let app = test_app();
        let response = app.login().await;
        let session = set_cookie(&response, "app_session");

        let mut tampered: Vec<char> = session.chars().collect();
        let at = tampered.len() - 2;
        tampered[at] = if tampered[at] == 'x' { 'y' } else { 'x' };
        let tampered: String = tampered.into_iter().collect();

        let response = app.send(get_me(Some(&tampered))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_me_for_unknown_profile_is_not_found() {
        let app = test_app();
        let (token, _) = mint_session_token(
            app.clock.as_ref(),
            &SessionIdentity {
                user_id: "google:ghost".to_string(),
                email: "ghost@example.com".to_string(),
                ..Default::default()
            },
            "tauth",
            KEY,
            Duration::minutes(15),
        )
        .unwrap();

        let response = app.send(get_me(Some(&format!("app_session={token}")))).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "profile_not_found");
    }

    #[tokio::test]
    async fn test_login_rejections() {
        let app = test_app();

        // malformed body
        let mut request = post("/auth/google", None, Body::from("{not json"));
        request
            .headers_mut()
            .insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        let response = app.send(request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "invalid_json");

        // unknown nonce
        let response = app.send(login_request("never-issued")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().get(header::SET_COOKIE).is_none());

        // plain http from a public host
        let nonce = app.nonce().await;
        app.google.claims.lock().unwrap().nonce = nonce.clone();
        let mut request = login_request(&nonce);
        request.headers_mut().remove("x-forwarded-proto");
        let response = app.send(request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "https_required");

        // unverified email
        let nonce = app.nonce().await;
        {
            let mut claims = app.google.claims.lock().unwrap();
            claims.nonce = nonce.clone();
            claims.email_verified = false;
        }
        let response = app.send(login_request(&nonce)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"], "unverified_identity");
    }

    #[tokio::test]
    async fn test_refresh_without_cookie() {
        let app = test_app();
        let response = app.send(post("/auth/refresh", None, Body::empty())).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_logout_always_succeeds() {
        let app = test_app();
        let response = app.send(post("/auth/logout", None, Body::empty())).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .send(post("/auth/logout", Some("app_refresh=garbage"), Body::empty()))
            .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers().get_all(header::SET_COOKIE).iter().count(), 2);
    }
}
