//! Bootstrap sequencing and the interrupt hook.
//!
//! The supervisor runs three strictly sequential steps: launch the instance
//! and wait for primary, publish the connection URL, push the schema under
//! the retry policy. An interrupt future is raced against every step. When
//! it fires, outstanding sync attempts are dropped, the instance (if any)
//! is stopped with a bounded wait, and the process exits.

use crate::error::BootstrapError;
use crate::instance::{DatabaseInstance, DatabaseLauncher, InstanceState};
use crate::retry::RetryPolicy;
use crate::sync::SchemaSync;
use kiln_db::DatabaseUrl;
use std::future::Future;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::Command;

/// Environment variable the connection URL is published under.
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";

/// Exit code used after an interrupt (128 + SIGINT).
pub const INTERRUPT_EXIT_CODE: i32 = 130;

/// Receives the connection URL once the instance is primary.
pub trait UrlPublisher: Send + Sync {
    fn publish(&self, url: &DatabaseUrl);
}

/// Publishes the URL into this process's environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvPublisher;

impl UrlPublisher for EnvPublisher {
    fn publish(&self, url: &DatabaseUrl) {
        std::env::set_var(DATABASE_URL_VAR, url.to_string());
        tracing::info!(var = DATABASE_URL_VAR, url = %url, "published connection url");
    }
}

/// Terminates the process.
pub trait ProcessControl: Send + Sync {
    fn exit(&self, code: i32);
}

/// Calls [`std::process::exit`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcess;

impl ProcessControl for SystemProcess {
    fn exit(&self, code: i32) {
        std::process::exit(code);
    }
}

/// What to do once the database is ready.
#[derive(Debug, Clone, Default)]
pub enum AfterReady {
    /// Keep the database up until interrupted.
    #[default]
    WaitForInterrupt,
    /// Run a command with `DATABASE_URL` set, then stop the database.
    Run { program: String, args: Vec<String> },
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Interrupted,
    ChildExited(i32),
}

/// Tunables for a [`Supervisor`].
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub db_name: String,
    pub retry: RetryPolicy,
    pub launch_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            db_name: "modernmern".to_string(),
            retry: RetryPolicy::default(),
            launch_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Drives a bootstrap run.
pub struct Supervisor<L, S> {
    launcher: L,
    sync: S,
    publisher: Box<dyn UrlPublisher>,
    process: Box<dyn ProcessControl>,
    settings: SupervisorSettings,
}

impl<L, S> Supervisor<L, S>
where
    L: DatabaseLauncher,
    S: SchemaSync,
{
    pub fn new(
        launcher: L,
        sync: S,
        publisher: Box<dyn UrlPublisher>,
        process: Box<dyn ProcessControl>,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            launcher,
            sync,
            publisher,
            process,
            settings,
        }
    }

    /// Runs the bootstrap sequence until `interrupt` resolves or, with
    /// [`AfterReady::Run`], until the command exits.
    ///
    /// # Errors
    ///
    /// Launch failures, a launch that never reaches primary, and schema sync
    /// exhaustion are fatal. The instance is stopped before the error is
    /// returned.
    pub async fn run<I>(&self, interrupt: I, after: AfterReady) -> Result<Outcome, BootstrapError>
    where
        I: Future<Output = ()>,
    {
        tokio::pin!(interrupt);

        tracing::info!("launching ephemeral database");
        let launched = tokio::select! {
            biased;
            () = &mut interrupt => return Ok(self.on_interrupt(None).await),
            launched = tokio::time::timeout(self.settings.launch_timeout, self.launcher.launch()) => launched,
        };
        let mut instance = launched
            .map_err(|_| BootstrapError::LaunchTimeout(self.settings.launch_timeout))??;

        let state = instance.state();
        if state != InstanceState::Primary {
            let _ = self.shutdown(&mut instance).await;
            return Err(BootstrapError::NotReady(state));
        }

        let url = instance.url_for(&self.settings.db_name);
        self.publisher.publish(&url);

        let synced = tokio::select! {
            biased;
            () = &mut interrupt => None,
            synced = self.push_schema(&url) => Some(synced),
        };
        match synced {
            None => return Ok(self.on_interrupt(Some(&mut instance)).await),
            Some(Err(e)) => {
                let _ = self.shutdown(&mut instance).await;
                return Err(e);
            }
            Some(Ok(applied)) => {
                tracing::info!(applied, db = %self.settings.db_name, "schema in sync");
            }
        }

        let endpoint = instance.endpoint();
        println!("Database ready - endpoint: {endpoint}");
        tracing::info!(%endpoint, url = %url, "database ready");

        match after {
            AfterReady::WaitForInterrupt => {
                interrupt.await;
                Ok(self.on_interrupt(Some(&mut instance)).await)
            }
            AfterReady::Run { program, args } => {
                let status = tokio::select! {
                    biased;
                    () = &mut interrupt => None,
                    status = run_child(&program, &args, &url) => Some(status),
                };
                match status {
                    None => Ok(self.on_interrupt(Some(&mut instance)).await),
                    Some(status) => {
                        let shutdown = self.shutdown(&mut instance).await;
                        let status = status?;
                        shutdown?;
                        let code = exit_code(status);
                        tracing::info!(program = %program, code, "command exited");
                        Ok(Outcome::ChildExited(code))
                    }
                }
            }
        }
    }

    async fn push_schema(&self, url: &DatabaseUrl) -> Result<usize, BootstrapError> {
        self.settings
            .retry
            .run(|attempt| {
                tracing::debug!(attempt, "pushing schema");
                self.sync.push(url)
            })
            .await
            .map_err(|e| BootstrapError::SchemaSync {
                attempts: e.attempts,
                source: e.last,
            })
    }

    async fn on_interrupt(&self, instance: Option<&mut L::Instance>) -> Outcome {
        tracing::info!("received interrupt, shutting down");
        if let Some(instance) = instance {
            let _ = self.shutdown(instance).await;
        }
        self.process.exit(INTERRUPT_EXIT_CODE);
        Outcome::Interrupted
    }

    /// Stops the instance, waiting at most `shutdown_timeout`.
    async fn shutdown(&self, instance: &mut L::Instance) -> Result<(), BootstrapError> {
        let limit = self.settings.shutdown_timeout;
        match tokio::time::timeout(limit, instance.stop()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "failed to stop database");
                Err(e)
            }
            Err(_) => {
                tracing::error!(timeout_ms = limit.as_millis() as u64, "database stop timed out");
                Err(BootstrapError::ShutdownTimeout(limit))
            }
        }
    }
}

async fn run_child(
    program: &str,
    args: &[String],
    url: &DatabaseUrl,
) -> Result<ExitStatus, BootstrapError> {
    tracing::info!(program, ?args, "running command");
    let status = Command::new(program)
        .args(args)
        .env(DATABASE_URL_VAR, url.to_string())
        .kill_on_drop(true)
        .status()
        .await?;
    Ok(status)
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}
