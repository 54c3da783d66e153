//! Schema synchronization against a live database.

use crate::error::SyncError;
use async_trait::async_trait;
use kiln_db::DatabaseUrl;
use rusqlite::Connection;
use std::time::Duration;

/// Applies the schema to the database behind a URL.
#[async_trait]
pub trait SchemaSync: Send + Sync {
    /// Returns the number of migrations applied by this attempt.
    async fn push(&self, url: &DatabaseUrl) -> Result<usize, SyncError>;
}

/// Pushes the embedded `kiln-db` migrations.
#[derive(Debug, Clone)]
pub struct MigrationSync {
    busy_timeout: Duration,
}

impl MigrationSync {
    pub fn new(busy_timeout: Duration) -> Self {
        Self { busy_timeout }
    }
}

impl Default for MigrationSync {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl SchemaSync for MigrationSync {
    async fn push(&self, url: &DatabaseUrl) -> Result<usize, SyncError> {
        let url = url.clone();
        let busy_timeout = self.busy_timeout;

        tokio::task::spawn_blocking(move || {
            let conn = match &url {
                DatabaseUrl::Memory => Connection::open_in_memory(),
                DatabaseUrl::File(path) => Connection::open(path),
            }
            .map_err(|e| SyncError::Unavailable(e.to_string()))?;
            conn.busy_timeout(busy_timeout)
                .map_err(|e| SyncError::Unavailable(e.to_string()))?;

            let applied = kiln_db::run_migrations(&conn)?;
            tracing::info!(url = %url, applied, "schema pushed");
            Ok::<_, SyncError>(applied)
        })
        .await
        .map_err(|e| SyncError::Join(e.to_string()))?
    }
}
