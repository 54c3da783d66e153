//! Ephemeral test database bootstrapper.
//!
//! Brings up a throwaway SQLite instance, waits for it to report primary,
//! publishes its connection URL, pushes the schema under an explicit retry
//! policy and keeps the instance alive until interrupted (or until a
//! supervised command exits). See [`Supervisor::run`].

pub mod config;
mod error;
pub mod instance;
pub mod retry;
pub mod supervisor;
pub mod sync;

pub use error::{BootstrapError, SyncError};
pub use instance::{DatabaseInstance, DatabaseLauncher, EphemeralSqlite, InstanceState, SqliteInstance};
pub use retry::{RetryError, RetryPolicy};
pub use supervisor::{
    AfterReady, EnvPublisher, Outcome, ProcessControl, Supervisor, SupervisorSettings,
    SystemProcess, UrlPublisher, DATABASE_URL_VAR, INTERRUPT_EXIT_CODE,
};
pub use sync::{MigrationSync, SchemaSync};
