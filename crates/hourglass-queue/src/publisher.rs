//! Produce-only handle.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hourglass_store::Store;

use crate::config::QueueConfig;
use crate::error::QueueResult;
use crate::message::{MessageId, SendOptions};
use crate::queue::DelayQueue;

/// Enqueue-only view of a queue, for processes that never consume.
#[derive(Clone)]
pub struct Publisher {
    queue: Arc<DelayQueue>,
}

impl Publisher {
    /// Create a publisher for the queue `name` on `store`.
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn Store>,
        config: QueueConfig,
    ) -> QueueResult<Self> {
        Ok(Self {
            queue: Arc::new(DelayQueue::new(name, store, config)?),
        })
    }

    /// Share an existing queue.
    pub fn from_queue(queue: Arc<DelayQueue>) -> Self {
        Self { queue }
    }

    pub fn name(&self) -> &str {
        self.queue.name()
    }

    /// Enqueue for delivery at `deliver_at`.
    pub async fn send_at(
        &self,
        payload: &str,
        deliver_at: DateTime<Utc>,
        opts: SendOptions,
    ) -> QueueResult<MessageId> {
        self.queue.send_at(payload, deliver_at, opts).await
    }

    /// Enqueue for delivery after `delay`.
    pub async fn send_after(
        &self,
        payload: &str,
        delay: Duration,
        opts: SendOptions,
    ) -> QueueResult<MessageId> {
        self.queue.send_after(payload, delay, opts).await
    }

    /// Broadcast produced events for monitors.
    pub fn enable_report(&self) {
        self.queue.enable_report();
    }

    pub fn disable_report(&self) {
        self.queue.disable_report();
    }
}
