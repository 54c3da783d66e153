//! `kiln-serverless`: local invoke loop for the function adapter.
//!
//! Reads one JSON event per line from stdin and writes one JSON response per
//! line to stdout. Logs go to stderr.

use axum::http::StatusCode;
use kiln_server::config;
use kiln_server::serverless::{ServerlessHandler, ServerlessRequest, ServerlessResponse};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

async fn respond(handler: &ServerlessHandler, line: &str) -> ServerlessResponse {
    let event: ServerlessRequest = match serde_json::from_str(line) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "rejected malformed event");
            return ServerlessResponse::error(StatusCode::BAD_REQUEST, "invalid event");
        }
    };

    match handler.handle(event).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(error = %e, "rejected event");
            ServerlessResponse::error(e.status(), e.to_string())
        }
    }
}

#[tokio::main]
async fn main() {
    let config_path = std::env::var("KILN_CONFIG_PATH")
        .ok()
        .filter(|path| !path.trim().is_empty());

    let config = match config::load_config(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("kiln-serverless: {e}");
            std::process::exit(2);
        }
    };

    kiln_server::init_tracing(&config.logging);

    let state = match kiln_server::init_state(&config) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize server state");
            std::process::exit(1);
        }
    };

    let handler = ServerlessHandler::new(kiln_server::app(state));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "failed to read event");
                std::process::exit(1);
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = respond(&handler, &line).await;
        let mut out = match serde_json::to_string(&response) {
            Ok(out) => out,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode response");
                continue;
            }
        };
        out.push('\n');

        if let Err(e) = async {
            stdout.write_all(out.as_bytes()).await?;
            stdout.flush().await
        }
        .await
        {
            tracing::error!(error = %e, "failed to write response");
            std::process::exit(1);
        }
    }
}
