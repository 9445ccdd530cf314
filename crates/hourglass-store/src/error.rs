//! Store errors.

use thiserror::Error;

/// Store error types.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend database failure.
    #[error("Database error: {0}")]
    Database(String),

    /// Operation against a key holding another kind of value.
    #[error("Wrong type for key: {0}")]
    WrongType(String),

    /// Stored value could not be interpreted.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Script aborted.
    #[error("Script {script} failed: {message}")]
    Script { script: String, message: String },

    /// Generic error.
    #[error("{0}")]
    Custom(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<tokio_rusqlite::Error> for StoreError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
