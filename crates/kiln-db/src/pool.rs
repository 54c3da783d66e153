//! Connection pools.
//!
//! A file URL gets a WAL-mode pool. An in-memory URL gets one named
//! shared-cache database per pool, so every pooled connection sees the same
//! schema and rows. That database lives as long as one of its connections
//! is open, so memory pools never retire idle connections.

use crate::DatabaseUrl;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

static NEXT_MEMORY_DB: AtomicU64 = AtomicU64::new(0);

/// Runtime tunables for SQLite connection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// Busy timeout for SQLite connections, in milliseconds.
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    pub pool_max_size: u32,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
        }
    }
}

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to create database connection pool: {0}")]
    PoolInit(#[from] r2d2::Error),
}

/// What the connection manager opens.
struct Target {
    location: String,
    flags: OpenFlags,
    shared_memory: bool,
}

impl Target {
    fn for_url(url: &DatabaseUrl) -> Self {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        match url {
            DatabaseUrl::File(path) => Self {
                location: path.to_string_lossy().into_owned(),
                flags,
                shared_memory: false,
            },
            DatabaseUrl::Memory => {
                let id = NEXT_MEMORY_DB.fetch_add(1, Ordering::Relaxed);
                Self {
                    location: format!(
                        "file:kiln-mem-{}-{id}?mode=memory&cache=shared",
                        std::process::id()
                    ),
                    flags: flags | OpenFlags::SQLITE_OPEN_URI,
                    shared_memory: true,
                }
            }
        }
    }
}

fn configure(
    conn: &Connection,
    settings: DbRuntimeSettings,
    shared_memory: bool,
) -> rusqlite::Result<()> {
    if shared_memory {
        // Readers do not wait on shared-cache table locks.
        conn.execute_batch("PRAGMA read_uncommitted = ON;")?;
    } else {
        let journal_mode: String =
            conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
        if journal_mode != "wal" {
            return Err(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                Some(format!(
                    "failed to set WAL journal mode, got: {journal_mode}"
                )),
            ));
        }
    }

    conn.execute_batch(&format!(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = {};",
        settings.busy_timeout_ms
    ))
}

/// Creates the connection pool for `url`.
///
/// # Errors
///
/// Returns `PoolError::PoolInit` if the initial connections cannot be
/// opened or configured.
pub fn create_pool(url: &DatabaseUrl, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    let target = Target::for_url(url);
    let shared_memory = target.shared_memory;

    let manager = SqliteConnectionManager::file(&target.location)
        .with_flags(target.flags)
        .with_init(move |conn| configure(conn, settings, shared_memory));

    let mut builder = Pool::builder().max_size(settings.pool_max_size);
    if shared_memory {
        builder = builder
            .min_idle(Some(settings.pool_max_size))
            .idle_timeout(None)
            .max_lifetime(None);
    }
    let pool = builder.build(manager)?;

    tracing::debug!(url = %url, max_size = settings.pool_max_size, "created database pool");

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{count_users, create_user, run_migrations};

    fn memory_pool(max_size: u32) -> DbPool {
        let settings = DbRuntimeSettings {
            busy_timeout_ms: 2_500,
            pool_max_size: max_size,
        };
        create_pool(&DatabaseUrl::Memory, settings).expect("pool creation should succeed")
    }

    #[test]
    fn settings_are_applied_to_memory_connections() {
        let pool = memory_pool(3);
        let conn = pool.get().expect("should get a connection");

        let fk: i32 = conn
            .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
            .expect("should query foreign_keys");
        assert_eq!(fk, 1);

        let busy_timeout: i32 = conn
            .query_row("PRAGMA busy_timeout;", [], |row| row.get(0))
            .expect("should query busy_timeout");
        assert_eq!(busy_timeout, 2_500);

        assert_eq!(pool.max_size(), 3);
    }

    #[test]
    fn memory_connections_share_one_database() {
        let pool = memory_pool(4);

        let migrated = pool.get().expect("should get a connection");
        run_migrations(&migrated).expect("migrations should succeed");

        // Checked out while `migrated` is still held, so it is a different connection.
        let other = pool.get().expect("should get a second connection");
        create_user(&other, "shared@example.com").expect("users table is visible");
        assert_eq!(count_users(&migrated).unwrap(), 1);
    }

    #[test]
    fn memory_pools_are_isolated() {
        let first = memory_pool(2);
        let second = memory_pool(2);

        run_migrations(&first.get().unwrap()).unwrap();

        let conn = second.get().unwrap();
        assert!(count_users(&conn).is_err(), "second pool has no schema");
    }

    #[test]
    fn file_pool_uses_wal() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let url = DatabaseUrl::file(dir.path().join("pool.db"));
        let pool = create_pool(&url, DbRuntimeSettings::default()).expect("pool should build");
        let conn = pool.get().expect("should get a connection");

        let mode: String = conn
            .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
            .expect("should query journal_mode");
        assert_eq!(mode, "wal");
    }
}
