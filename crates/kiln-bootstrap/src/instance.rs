//! Ephemeral database instances.
//!
//! A launcher brings up an instance and returns once it reports
//! [`InstanceState::Primary`]. The instance hands out connection URLs for
//! logical databases and is stopped explicitly; it is never left for the
//! process exit to clean up.

use crate::error::BootstrapError;
use async_trait::async_trait;
use kiln_db::DatabaseUrl;
use rusqlite::Connection;
use std::fmt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Lifecycle of an ephemeral instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Starting,
    /// Accepting writes.
    Primary,
    Stopped,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Primary => "primary",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Starts database instances.
#[async_trait]
pub trait DatabaseLauncher: Send + Sync {
    type Instance: DatabaseInstance;

    /// Starts an instance and waits until it reports a settled state.
    async fn launch(&self) -> Result<Self::Instance, BootstrapError>;
}

/// A running database instance.
#[async_trait]
pub trait DatabaseInstance: Send {
    fn state(&self) -> InstanceState;

    /// Base endpoint of the instance, without a logical database.
    fn endpoint(&self) -> String;

    /// Connection URL for the named logical database.
    fn url_for(&self, db_name: &str) -> DatabaseUrl;

    /// Stops the instance and releases its storage. Stopping twice is a no-op.
    async fn stop(&mut self) -> Result<(), BootstrapError>;
}

/// Launches SQLite instances in private temporary directories.
///
/// Each logical database is a file `<dir>/<name>.db`. The instance keeps a
/// primary connection open on `<dir>/.primary.db` for its whole lifetime.
#[derive(Debug, Clone, Default)]
pub struct EphemeralSqlite {
    root: Option<PathBuf>,
}

impl EphemeralSqlite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places instance directories under `root` instead of the system
    /// temporary directory.
    pub fn in_dir(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }
}

const PRIMARY_FILE: &str = ".primary.db";

fn open_primary(dir: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(dir.join(PRIMARY_FILE))?;

    let journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
    if journal_mode != "wal" {
        return Err(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
            Some(format!("expected WAL journal mode, got: {journal_mode}")),
        ));
    }

    let check: String = conn.query_row("PRAGMA quick_check;", [], |row| row.get(0))?;
    if check != "ok" {
        return Err(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CORRUPT),
            Some(format!("integrity check failed: {check}")),
        ));
    }

    // A committed write is the readiness signal.
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _kiln_instance (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            started_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        INSERT OR REPLACE INTO _kiln_instance (id) VALUES (1);",
    )?;

    Ok(conn)
}

#[async_trait]
impl DatabaseLauncher for EphemeralSqlite {
    type Instance = SqliteInstance;

    async fn launch(&self) -> Result<SqliteInstance, BootstrapError> {
        let root = self.root.clone();

        let (dir, primary) = tokio::task::spawn_blocking(move || {
            let mut builder = tempfile::Builder::new();
            builder.prefix("kiln-db-");
            let dir = match root {
                Some(root) => {
                    std::fs::create_dir_all(&root).map_err(|e| e.to_string())?;
                    builder.tempdir_in(root)
                }
                None => builder.tempdir(),
            }
            .map_err(|e| format!("failed to create instance directory: {e}"))?;
            let primary = open_primary(dir.path()).map_err(|e| e.to_string())?;
            Ok::<_, String>((dir, primary))
        })
        .await
        .map_err(|e| BootstrapError::Launch(format!("launch task failed: {e}")))?
        .map_err(BootstrapError::Launch)?;

        let path = dir.path().to_path_buf();
        tracing::info!(path = %path.display(), "ephemeral database is primary");

        Ok(SqliteInstance {
            path,
            dir: Some(dir),
            primary: Some(primary),
            state: InstanceState::Primary,
        })
    }
}

/// A running [`EphemeralSqlite`] instance.
#[derive(Debug)]
pub struct SqliteInstance {
    path: PathBuf,
    dir: Option<TempDir>,
    primary: Option<Connection>,
    state: InstanceState,
}

impl SqliteInstance {
    /// Directory holding the instance's database files.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DatabaseInstance for SqliteInstance {
    fn state(&self) -> InstanceState {
        self.state
    }

    fn endpoint(&self) -> String {
        format!("sqlite://{}/", self.path.display())
    }

    fn url_for(&self, db_name: &str) -> DatabaseUrl {
        DatabaseUrl::file(self.path.join(format!("{db_name}.db")))
    }

    async fn stop(&mut self) -> Result<(), BootstrapError> {
        if self.state == InstanceState::Stopped {
            return Ok(());
        }
        self.state = InstanceState::Stopped;

        let primary = self.primary.take();
        let dir = self.dir.take();

        tokio::task::spawn_blocking(move || {
            if let Some(conn) = primary {
                conn.close().map_err(|(_, e)| e.to_string())?;
            }
            if let Some(dir) = dir {
                dir.close().map_err(|e| e.to_string())?;
            }
            Ok::<_, String>(())
        })
        .await
        .map_err(|e| BootstrapError::Shutdown(format!("stop task failed: {e}")))?
        .map_err(BootstrapError::Shutdown)?;

        tracing::info!(path = %self.path.display(), "ephemeral database stopped");
        Ok(())
    }
}
