// src/main.rs
use axum::{extract::Request, middleware, Router};
use dotenv::dotenv;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use std::{net::SocketAddr, str::FromStr, sync::Arc};
use tokio::{net::TcpListener, signal};
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, info_span, warn};
use tracing_subscriber::EnvFilter;

// ============================================================================
// MODULE IMPORTS
// ============================================================================

mod auth;
mod common;
mod logging_middleware;
mod services;

// ============================================================================
// COMMON IMPORTS
// ============================================================================

use auth::metrics::CounterMetrics;
use auth::nonce::MemoryNonceStore;
use auth::refresh::{MemoryRefreshStore, RefreshTokenStore, SqliteRefreshStore};
use auth::AuthService;
use common::config::env_flag;
use common::{AppState, ServerConfig};
use services::{GoogleTokenInfoVerifier, InMemoryUsers, SqliteUserStore, UserProfileStore};
use session_validator::{Clock, SessionValidator, SystemClock, ValidatorConfig};

// ============================================================================
// MAIN APPLICATION ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // ========================================================================
    // ENVIRONMENT CONFIGURATION
    // ========================================================================

    let config = Arc::new(ServerConfig::from_env()?);
    info!(config = ?config, "Loaded configuration");

    let database_url = env::var("DATABASE_URL").unwrap_or_default();
    let request_timeout = env::var("REQUEST_TIMEOUT_SECONDS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|s| *s > 0)
        .unwrap_or(15);
    let enable_cors = env_flag("ENABLE_CORS");

    if config.allow_insecure_http() {
        warn!("⚠️  DEV_INSECURE_HTTP=true - cookies are sent without the Secure flag");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // ========================================================================
    // STORES
    // ========================================================================

    let (refresh_tokens, users): (Arc<dyn RefreshTokenStore>, Arc<dyn UserProfileStore>) =
        if database_url.trim().is_empty() {
            warn!("DATABASE_URL not set - using in-memory stores, sessions end on restart");
            let refresh_tokens: Arc<dyn RefreshTokenStore> =
                Arc::new(MemoryRefreshStore::new(clock.clone()));
            let users: Arc<dyn UserProfileStore> = Arc::new(InMemoryUsers::new());
            (refresh_tokens, users)
        } else {
            if let Some(path_part) = database_url.strip_prefix("sqlite://") {
                let path_without_params = path_part.split('?').next().unwrap_or("");
                if !path_without_params.is_empty() && !path_without_params.starts_with(':') {
                    let db_path = PathBuf::from(path_without_params);
                    if let Some(parent) = db_path.parent() {
                        if !parent.as_os_str().is_empty() {
                            tokio::fs::create_dir_all(parent).await?;
                        }
                    }
                }
            }

            let connect_options =
                SqliteConnectOptions::from_str(&database_url)?.create_if_missing(true);
            let pool = SqlitePoolOptions::new()
                .connect_with(connect_options)
                .await?;

            // Run database migrations
            common::migrations::run_migrations(&pool).await?;
            info!("SQLite stores initialized");

            let refresh_tokens: Arc<dyn RefreshTokenStore> =
                Arc::new(SqliteRefreshStore::new(pool.clone(), clock.clone()));
            let users: Arc<dyn UserProfileStore> = Arc::new(SqliteUserStore::new(pool));
            (refresh_tokens, users)
        };

    // ========================================================================
    // SERVICE INITIALIZATION
    // ========================================================================

    let verifier = Arc::new(GoogleTokenInfoVerifier::new(
        clock.clone(),
        Duration::from_secs(request_timeout),
    )?);
    info!("GoogleTokenInfoVerifier initialized");

    let nonces = Arc::new(MemoryNonceStore::new(config.nonce_ttl(), clock.clone()));
    let metrics = Arc::new(CounterMetrics::new());

    let auth_service = AuthService::new(
        config.clone(),
        clock.clone(),
        nonces,
        refresh_tokens,
        users.clone(),
        verifier,
    )
    .with_metrics(metrics.clone());
    info!("AuthService initialized");

    let validator = SessionValidator::with_clock(
        ValidatorConfig {
            signing_key: config.signing_key().to_vec(),
            issuer: config.issuer().to_string(),
            cookie_name: config.session_cookie_name().to_string(),
        },
        clock,
    )?;

    // ========================================================================
    // APPLICATION STATE
    // ========================================================================

    let shared = Arc::new(AppState {
        auth: Arc::new(auth_service),
        validator: Arc::new(validator),
        users,
        config: config.clone(),
    });

    // ========================================================================
    // ROUTER COMPOSITION
    // ========================================================================

    let mut app = Router::new()
        .merge(auth::auth_routes(shared))
        .layer(middleware::from_fn(logging_middleware::log_request_response))
        .layer(TimeoutLayer::new(Duration::from_secs(request_timeout)));

    if enable_cors {
        app = app.layer(cors_layer());
    }

    let app = app.layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
        info_span!(
            "http.request",
            http.method = %request.method(),
            http.path = %request.uri().path()
        )
    }));

    // ========================================================================
    // SERVER STARTUP
    // ========================================================================

    let port = env::var("PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(counters = ?metrics.snapshot(), "Auth counters at shutdown");

    Ok(())
}

/// Credentialed CORS over the comma-separated `CORS_ORIGINS`.
fn cors_layer() -> CorsLayer {
    let cors_origins = env::var("CORS_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3000,http://localhost:5173".to_string());

    let origins: Vec<axum::http::HeaderValue> = cors_origins
        .split(',')
        .filter_map(|origin| origin.trim().parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderName::from_static("x-request-id"),
        ])
        .allow_credentials(true)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Gracefully shutdown");
}
