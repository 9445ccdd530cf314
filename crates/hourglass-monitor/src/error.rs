//! Monitor errors.

use hourglass_queue::QueueError;
use hourglass_store::StoreError;
use thiserror::Error;

/// Monitor error types.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Queue introspection failed.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Could not subscribe to the report channel.
    #[error("Failed to subscribe to {channel}: {source}")]
    Subscribe {
        channel: String,
        #[source]
        source: StoreError,
    },
}

/// Result type for monitor operations.
pub type MonitorResult<T> = Result<T, MonitorError>;
