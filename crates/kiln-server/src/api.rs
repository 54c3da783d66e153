//! API handlers for the Kiln server.

use crate::AppState;
use axum::{
    extract::{Extension, Json},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use kiln_db::{create_user, UserError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Body of `GET /`.
pub const GREETING: &str = "Hello World";

/// Body of `GET /prisma`.
pub const USER_ADDED: &str = "Add a new unique user without duplicate";

/// Email inserted by `GET /prisma`.
pub const SEED_EMAIL: &str = "random@example.com";

/// `{"msg": ...}` response body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageResponse {
    pub msg: String,
}

impl MessageResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { msg: msg.into() }
    }
}

/// API error type mapping to HTTP status codes.
///
/// Internal details are logged, never sent to the client.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT FOUND"),
            ApiError::InternalServerError(detail) => {
                tracing::error!(error = %detail, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL SERVER ERROR")
            }
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

/// Handler for `GET /`.
pub async fn index_handler() -> Json<MessageResponse> {
    Json(MessageResponse::new(GREETING))
}

/// Handler for `GET /prisma`.
///
/// Inserts [`SEED_EMAIL`] on every call. The `users.email` column is unique,
/// so every call after the first fails with a 500.
pub async fn add_user_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<MessageResponse>, ApiError> {
    let user = tokio::task::spawn_blocking(move || {
        let conn = state
            .pool
            .get()
            .map_err(|e| ApiError::InternalServerError(format!("db connection failed: {}", e)))?;

        create_user(&conn, SEED_EMAIL).map_err(|e| match e {
            UserError::Duplicate(email) => {
                ApiError::InternalServerError(format!("unique constraint violated for {email}"))
            }
            other => ApiError::InternalServerError(other.to_string()),
        })
    })
    .await
    .map_err(|e| ApiError::InternalServerError(format!("task join error: {}", e)))??;

    tracing::info!(user_id = user.id, "added user");

    Ok(Json(MessageResponse::new(USER_ADDED)))
}

/// Fallback for unmatched paths and methods.
pub async fn not_found_handler() -> ApiError {
    ApiError::NotFound
}
