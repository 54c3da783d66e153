//! User records.

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use thiserror::Error;

/// Errors that can occur during user operations.
#[derive(Debug, Error)]
pub enum UserError {
    /// A user with this email already exists.
    #[error("user already exists: {0}")]
    Duplicate(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// A stored user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Internal database ID.
    pub id: i64,
    /// Email address, unique across users.
    pub email: String,
    /// Creation timestamp (SQLite `datetime('now')`, UTC).
    pub created_at: String,
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        created_at: row.get(2)?,
    })
}

/// Inserts a new user and returns the stored record.
///
/// # Errors
///
/// Returns `UserError::Duplicate` if the email is already taken.
pub fn create_user(conn: &Connection, email: &str) -> Result<User, UserError> {
    let inserted = conn.query_row(
        "INSERT INTO users (email) VALUES (?1) RETURNING id, email, created_at",
        params![email],
        row_to_user,
    );

    match inserted {
        Ok(user) => {
            tracing::debug!(user_id = user.id, "created user");
            Ok(user)
        }
        Err(e) if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
            Err(UserError::Duplicate(email.to_string()))
        }
        Err(e) => Err(UserError::Database(e)),
    }
}

/// Looks up a user by email.
pub fn get_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>, UserError> {
    let user = conn
        .query_row(
            "SELECT id, email, created_at FROM users WHERE email = ?1",
            params![email],
            row_to_user,
        )
        .optional()?;
    Ok(user)
}

/// Returns the number of stored users.
pub fn count_users(conn: &Connection) -> Result<i64, UserError> {
    let count = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
    Ok(count)
}
