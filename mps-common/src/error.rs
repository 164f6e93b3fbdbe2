//! Common error types for MPS

use thiserror::Error;

/// Common result type for MPS operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across MPS crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[cfg(feature = "sqlx")]
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

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when repeating the same write could plausibly succeed
    ///
    /// Lookups and validation failures are deterministic and never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            #[cfg(feature = "sqlx")]
            Error::Database(db_err) => !matches!(db_err, sqlx::Error::RowNotFound),
            Error::Io(_) | Error::Internal(_) => true,
            Error::Config(_) | Error::NotFound(_) | Error::InvalidInput(_) => false,
        }
    }
}
