use crate::config::ConfigError;
use crate::instance::InstanceState;
use kiln_db::{MigrationError, UrlError};
use std::time::Duration;
use thiserror::Error;

/// Errors that end a bootstrap run.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("failed to launch database: {0}")]
    Launch(String),

    #[error("database did not report primary within {0:?}")]
    LaunchTimeout(Duration),

    #[error("database reported {0} instead of primary")]
    NotReady(InstanceState),

    #[error("schema sync failed after {attempts} attempts: {source}")]
    SchemaSync { attempts: u32, source: SyncError },

    #[error("failed to stop database: {0}")]
    Shutdown(String),

    #[error("database stop did not complete within {0:?}")]
    ShutdownTimeout(Duration),

    #[error("failed to run command: {0}")]
    Child(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors from a single schema sync attempt.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("database unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Url(#[from] UrlError),

    #[error("sync task failed: {0}")]
    Join(String),
}
