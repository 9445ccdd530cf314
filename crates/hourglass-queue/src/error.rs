//! Queue errors.

use hourglass_store::{Reply, StoreError};
use thiserror::Error;

/// Queue error types.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Configuration rejected at construction.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Consumer started without a message handler.
    #[error("No message handler registered")]
    MissingHandler,

    /// Consumer already running.
    #[error("Consumer is already running")]
    AlreadyRunning,

    /// Consumer was stopped and cannot be restarted.
    #[error("Consumer has been stopped")]
    Stopped,

    /// Backing store failure during an operation.
    #[error("Store error during {op}: {source}")]
    Store {
        op: &'static str,
        #[source]
        source: StoreError,
    },

    /// A script returned a reply of the wrong shape.
    #[error("Unexpected reply from {script}: {reply:?}")]
    UnexpectedReply { script: &'static str, reply: Reply },

    /// Event could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QueueError {
    /// Wrap a store error with the operation that hit it.
    pub fn store(op: &'static str) -> impl FnOnce(StoreError) -> QueueError {
        move |source| QueueError::Store { op, source }
    }
}

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;
