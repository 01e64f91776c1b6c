//! Common error types for the catalogue services

use thiserror::Error;

/// Common result type for catalogue operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across catalogue crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for SQLite "database is locked" / "busy" errors that are worth retrying
    pub fn is_lock_contention(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Database(db_err)) => {
                let msg = db_err.message().to_ascii_lowercase();
                msg.contains("database is locked") || msg.contains("busy")
            }
            _ => false,
        }
    }
}
