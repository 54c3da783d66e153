//! Kiln server library logic.

pub mod api;
pub mod config;
pub mod middleware;
pub mod serverless;

use axum::{routing::get, Extension, Router};
use config::{Config, LoggingConfig};
use kiln_db::{DatabaseUrl, DbPool, MigrationError, PoolError, UrlError};
use middleware::{InvalidHeader, SecurityHeaders};
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// Headers stamped onto every response.
    pub security: SecurityHeaders,
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let security = state.security.clone();

    Router::new()
        .route("/", get(api::index_handler))
        .route("/prisma", get(api::add_user_handler))
        .fallback(api::not_found_handler)
        .method_not_allowed_fallback(api::not_found_handler)
        .layer(axum::middleware::from_fn_with_state(
            security,
            middleware::security_headers_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}

/// Errors that prevent the server from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid database url: {0}")]
    Url(#[from] UrlError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("failed to get database connection: {0}")]
    Connection(#[from] r2d2::Error),
    #[error(transparent)]
    Migration(#[from] MigrationError),
    #[error(transparent)]
    Security(#[from] InvalidHeader),
}

/// Builds the shared state from configuration: parses the database URL,
/// creates the pool and, when enabled, applies pending migrations.
///
/// # Errors
///
/// Returns `StartupError` if any of those steps fail.
pub fn init_state(config: &Config) -> Result<AppState, StartupError> {
    let url: DatabaseUrl = config.database.url.parse()?;
    let pool = kiln_db::create_pool(&url, config.database.runtime_settings())?;

    if config.database.migrate_on_start {
        let conn = pool.get()?;
        let applied = kiln_db::run_migrations(&conn)?;
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
    }

    let security = SecurityHeaders::from_config(&config.security)?;

    tracing::info!(url = %url, "database ready");

    Ok(AppState { pool, security })
}

/// Installs the global tracing subscriber. Logs are written to stderr.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}
