//! Bootstrapper configuration loading from file and environment variables.

use crate::retry::RetryPolicy;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level bootstrapper configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Ephemeral database settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Logical database name the published URL points at.
    #[serde(default = "default_db_name")]
    pub name: String,

    /// Parent directory for instance directories. System temp dir if unset.
    #[serde(default)]
    pub root_dir: Option<PathBuf>,
}

/// Schema sync retry settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default)]
    pub jitter: bool,
}

/// Launch and shutdown bounds.
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_launch_timeout_ms")]
    pub launch_timeout_ms: u64,

    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "kiln_bootstrap=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_db_name() -> String {
    "modernmern".to_string()
}

fn default_max_attempts() -> u32 {
    10
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_launch_timeout_ms() -> u64 {
    10_000
}

fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            name: default_db_name(),
            root_dir: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            jitter: false,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            launch_timeout_ms: default_launch_timeout_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
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

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            multiplier: self.multiplier,
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: self.jitter,
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
/// - `KILN_BOOTSTRAP_DB_NAME` overrides `database.name`
/// - `KILN_BOOTSTRAP_ROOT_DIR` overrides `database.root_dir`
/// - `KILN_BOOTSTRAP_MAX_ATTEMPTS` overrides `retry.max_attempts`
/// - `KILN_BOOTSTRAP_INITIAL_DELAY_MS` overrides `retry.initial_delay_ms`
/// - `KILN_BOOTSTRAP_MAX_DELAY_MS` overrides `retry.max_delay_ms`
/// - `KILN_BOOTSTRAP_SHUTDOWN_TIMEOUT_MS` overrides `timeouts.shutdown_timeout_ms`
/// - `KILN_LOG_LEVEL` overrides `logging.level`
/// - `KILN_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<BootstrapConfig, ConfigError> {
    let config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                BootstrapConfig::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => BootstrapConfig::default(),
    };

    Ok(apply_env_overrides(config, |key| std::env::var(key).ok()))
}

fn apply_env_overrides(
    mut config: BootstrapConfig,
    var: impl Fn(&str) -> Option<String>,
) -> BootstrapConfig {
    if let Some(name) = var("KILN_BOOTSTRAP_DB_NAME").filter(|v| !v.trim().is_empty()) {
        config.database.name = name;
    }
    if let Some(root) = var("KILN_BOOTSTRAP_ROOT_DIR").filter(|v| !v.trim().is_empty()) {
        config.database.root_dir = Some(PathBuf::from(root));
    }
    if let Some(parsed) = var("KILN_BOOTSTRAP_MAX_ATTEMPTS").and_then(|v| v.parse().ok()) {
        config.retry.max_attempts = parsed;
    }
    if let Some(parsed) = var("KILN_BOOTSTRAP_INITIAL_DELAY_MS").and_then(|v| v.parse().ok()) {
        config.retry.initial_delay_ms = parsed;
    }
    if let Some(parsed) = var("KILN_BOOTSTRAP_MAX_DELAY_MS").and_then(|v| v.parse().ok()) {
        config.retry.max_delay_ms = parsed;
    }
    if let Some(parsed) = var("KILN_BOOTSTRAP_SHUTDOWN_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        config.timeouts.shutdown_timeout_ms = parsed;
    }
    if let Some(level) = var("KILN_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("KILN_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    config
}
