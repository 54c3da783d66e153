//! Schema synchronization.
//!
//! The schema is a list of SQL files compiled into the binary. Applying the
//! pending ones is the "schema push" the test bootstrapper retries and the
//! server runs on startup, possibly against the same database file at the
//! same time. Each migration is checked and applied inside one `IMMEDIATE`
//! transaction, so concurrent pushes serialize on the write lock and a
//! migration is recorded at most once.

use rusqlite::{Connection, Transaction, TransactionBehavior};
use thiserror::Error;

struct Migration {
    name: &'static str,
    sql: &'static str,
}

/// Applied in order. Append only.
const MIGRATIONS: &[Migration] = &[Migration {
    name: "001_users",
    sql: include_str!("migrations/001_users.sql"),
}];

const TRACKING_TABLE: &str = "CREATE TABLE IF NOT EXISTS _kiln_migrations (
    name TEXT PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);";

#[derive(Debug, Error)]
pub enum MigrationError {
    /// The `_kiln_migrations` bookkeeping failed.
    #[error("failed to track schema state: {0}")]
    Tracking(rusqlite::Error),

    /// A migration's SQL failed; nothing from it was kept.
    #[error("migration '{name}' failed: {source}")]
    Failed {
        name: &'static str,
        source: rusqlite::Error,
    },
}

/// Brings the schema up to date and returns how many migrations this call
/// applied. Zero means the database was already in sync.
///
/// # Errors
///
/// Returns `MigrationError` if the tracking table cannot be used or a
/// migration fails. Migrations applied before the failure stay applied.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    apply(conn, MIGRATIONS)
}

fn apply(conn: &Connection, migrations: &[Migration]) -> Result<usize, MigrationError> {
    conn.execute_batch(TRACKING_TABLE)
        .map_err(MigrationError::Tracking)?;

    let mut applied = 0;
    for migration in migrations {
        if apply_one(conn, migration)? {
            applied += 1;
        }
    }

    if applied > 0 {
        tracing::info!(applied, total = migrations.len(), "schema synchronized");
    } else {
        tracing::debug!("schema already in sync");
    }
    Ok(applied)
}

fn apply_one(conn: &Connection, migration: &Migration) -> Result<bool, MigrationError> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
        .map_err(MigrationError::Tracking)?;

    let done: bool = tx
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM _kiln_migrations WHERE name = ?1)",
            [migration.name],
            |row| row.get(0),
        )
        .map_err(MigrationError::Tracking)?;
    if done {
        return Ok(false);
    }

    let failed = |source| MigrationError::Failed {
        name: migration.name,
        source,
    };
    tx.execute_batch(migration.sql).map_err(failed)?;
    tx.execute(
        "INSERT INTO _kiln_migrations (name) VALUES (?1)",
        [migration.name],
    )
    .map_err(failed)?;
    tx.commit().map_err(failed)?;

    tracing::info!(migration = migration.name, "applied migration");
    Ok(true)
}
