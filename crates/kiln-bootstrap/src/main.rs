//! `kiln-test-db`: starts an ephemeral database for local test runs.
//!
//! Usage: `kiln-test-db [CONFIG] [-- COMMAND [ARGS...]]`
//!
//! Without a command the database stays up until SIGINT. With a command,
//! the command runs with `DATABASE_URL` set and the database is stopped
//! when it exits; the exit code is passed through.

use kiln_bootstrap::config::{self, BootstrapConfig};
use kiln_bootstrap::{
    AfterReady, EnvPublisher, EphemeralSqlite, MigrationSync, Outcome, Supervisor,
    SupervisorSettings, SystemProcess,
};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

struct Args {
    config_path: Option<String>,
    after: AfterReady,
}

fn parse_args(args: impl Iterator<Item = String>) -> Args {
    let mut config_path = None;
    let mut command = Vec::new();
    let mut in_command = false;

    for arg in args {
        if in_command {
            command.push(arg);
        } else if arg == "--" {
            in_command = true;
        } else if config_path.is_none() && !arg.trim().is_empty() {
            config_path = Some(arg);
        }
    }

    let after = if command.is_empty() {
        AfterReady::WaitForInterrupt
    } else {
        let program = command.remove(0);
        AfterReady::Run {
            program,
            args: command,
        }
    };

    Args { config_path, after }
}

fn resolve_config_path(cli: Option<String>) -> (Option<String>, &'static str) {
    if let Some(path) = cli {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("KILN_BOOTSTRAP_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

fn init_tracing(config: &BootstrapConfig) {
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    // Logs go to stderr so the readiness line is the only stdout output.
    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install SIGINT handler");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() {
    let args = parse_args(std::env::args().skip(1));
    let (config_path, config_source) = resolve_config_path(args.config_path);

    let config = match config::load_config(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("kiln-test-db: {e}");
            std::process::exit(2);
        }
    };

    init_tracing(&config);
    tracing::info!(
        source = config_source,
        path = config_path.as_deref().unwrap_or("<none>"),
        "resolved bootstrap configuration"
    );

    let launcher = match &config.database.root_dir {
        Some(root) => EphemeralSqlite::in_dir(root),
        None => EphemeralSqlite::new(),
    };
    let settings = SupervisorSettings {
        db_name: config.database.name.clone(),
        retry: config.retry.policy(),
        launch_timeout: Duration::from_millis(config.timeouts.launch_timeout_ms),
        shutdown_timeout: Duration::from_millis(config.timeouts.shutdown_timeout_ms),
    };
    let supervisor = Supervisor::new(
        launcher,
        MigrationSync::default(),
        Box::new(EnvPublisher),
        Box::new(SystemProcess),
        settings,
    );

    match supervisor.run(interrupt(), args.after).await {
        Ok(Outcome::ChildExited(code)) => std::process::exit(code),
        Ok(Outcome::Interrupted) => {}
        Err(e) => {
            tracing::error!(error = %e, "bootstrap failed");
            std::process::exit(1);
        }
    }
}
