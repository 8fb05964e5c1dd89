//! Common error types for EPA services

use thiserror::Error;

/// Common result type for EPA operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across EPA services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored payload could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when SQLite reported lock contention (safe to retry)
    pub fn is_lock_contention(&self) -> bool {
        match self {
            Error::Database(db_err) => {
                let text = db_err.to_string();
                text.contains("database is locked") || text.contains("database table is locked")
            }
            _ => false,
        }
    }
}
