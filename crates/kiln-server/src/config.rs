//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Response security headers.
    #[serde(default)]
    pub security: SecurityConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL (`sqlite://<path>`, a bare path, or `:memory:`).
    #[serde(default = "default_db_url")]
    pub url: String,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum pooled connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,

    /// Apply pending migrations before serving.
    #[serde(default = "default_true")]
    pub migrate_on_start: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "kiln_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Security header values. Defaults follow the common helmet baseline.
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_csp")]
    pub content_security_policy: String,

    /// Send `Strict-Transport-Security`.
    #[serde(default = "default_true")]
    pub hsts: bool,

    #[serde(default = "default_hsts_max_age")]
    pub hsts_max_age: u64,

    #[serde(default = "default_true")]
    pub hsts_include_subdomains: bool,

    #[serde(default = "default_frame_options")]
    pub frame_options: String,

    #[serde(default = "default_referrer_policy")]
    pub referrer_policy: String,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_db_url() -> String {
    "sqlite://kiln.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_csp() -> String {
    "default-src 'self';base-uri 'self';font-src 'self' https: data:;\
     form-action 'self';frame-ancestors 'self';img-src 'self' data:;\
     object-src 'none';script-src 'self';script-src-attr 'none';\
     style-src 'self' https: 'unsafe-inline';upgrade-insecure-requests"
        .to_string()
}

fn default_hsts_max_age() -> u64 {
    31_536_000
}

fn default_frame_options() -> String {
    "SAMEORIGIN".to_string()
}

fn default_referrer_policy() -> String {
    "no-referrer".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_db_url(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
            migrate_on_start: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            content_security_policy: default_csp(),
            hsts: true,
            hsts_max_age: default_hsts_max_age(),
            hsts_include_subdomains: true,
            frame_options: default_frame_options(),
            referrer_policy: default_referrer_policy(),
        }
    }
}

impl DatabaseConfig {
    pub fn runtime_settings(&self) -> kiln_db::DbRuntimeSettings {
        kiln_db::DbRuntimeSettings {
            busy_timeout_ms: self.busy_timeout_ms,
            pool_max_size: self.pool_max_size,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `KILN_HOST` overrides `server.host`
/// - `KILN_PORT` overrides `server.port`
/// - `DATABASE_URL` overrides `database.url`
/// - `KILN_DATABASE_URL` overrides `database.url` (wins over `DATABASE_URL`)
/// - `KILN_MIGRATE_ON_START` overrides `database.migrate_on_start`
/// - `KILN_LOG_LEVEL` overrides `logging.level`
/// - `KILN_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    Ok(apply_env_overrides(config, |key| std::env::var(key).ok()))
}

fn flag(value: &str) -> bool {
    value == "true" || value == "1"
}

fn apply_env_overrides(mut config: Config, var: impl Fn(&str) -> Option<String>) -> Config {
    if let Some(parsed) = var("KILN_HOST").and_then(|v| v.parse().ok()) {
        config.server.host = parsed;
    }
    if let Some(parsed) = var("KILN_PORT").and_then(|v| v.parse().ok()) {
        config.server.port = parsed;
    }
    if let Some(url) = var("KILN_DATABASE_URL")
        .or_else(|| var("DATABASE_URL"))
        .filter(|v| !v.trim().is_empty())
    {
        config.database.url = url;
    }
    if let Some(migrate) = var("KILN_MIGRATE_ON_START") {
        config.database.migrate_on_start = flag(&migrate);
    }
    if let Some(level) = var("KILN_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("KILN_LOG_JSON") {
        config.logging.json = flag(&json);
    }

    config
}
