//! Database layer for Kiln.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! embedded SQL migrations, connection URL parsing and the `users` queries
//! used by the HTTP handlers.
//!
//! # Design decisions
//!
//! - **Connection URL, not ambient state**: callers hand a [`DatabaseUrl`]
//!   to [`create_pool`]. Whoever reads `DATABASE_URL` does so once, at
//!   startup, and threads the parsed value through.
//! - **Embedded migrations**: SQL files are compiled into the binary via
//!   `include_str!`. Applying them is the schema synchronization step the
//!   test bootstrapper retries.

mod migrations;
mod pool;
mod url;
mod users;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
pub use url::{DatabaseUrl, UrlError};
pub use users::{count_users, create_user, get_user_by_email, User, UserError};
