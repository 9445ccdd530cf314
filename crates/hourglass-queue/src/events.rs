//! Lifecycle events and the listener hook.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hourglass_store::Store;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::QueueResult;

/// Kind of lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Produced,
    Ready,
    Delivered,
    Acked,
    Nacked,
    Retried,
    DeadLettered,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::Produced,
        EventKind::Ready,
        EventKind::Delivered,
        EventKind::Acked,
        EventKind::Nacked,
        EventKind::Retried,
        EventKind::DeadLettered,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Produced => "produced",
            EventKind::Ready => "ready",
            EventKind::Delivered => "delivered",
            EventKind::Acked => "acked",
            EventKind::Nacked => "nacked",
            EventKind::Retried => "retried",
            EventKind::DeadLettered => "dead_lettered",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transition affecting `count` messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub count: u64,
}

impl Event {
    pub fn new(kind: EventKind, timestamp: DateTime<Utc>, count: u64) -> Self {
        Self {
            kind,
            timestamp,
            count,
        }
    }

    /// Encode for the report channel.
    pub fn encode(&self) -> QueueResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a report channel message.
    pub fn decode(raw: &str) -> QueueResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Receives lifecycle events from a queue.
#[async_trait]
pub trait EventListener: Send + Sync {
    async fn on_event(&self, event: &Event);
}

/// Listener that broadcasts every event on the queue's report channel.
pub struct PubSubReporter {
    store: Arc<dyn Store>,
    channel: String,
}

impl PubSubReporter {
    pub fn new(store: Arc<dyn Store>, channel: impl Into<String>) -> Self {
        Self {
            store,
            channel: channel.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl EventListener for PubSubReporter {
    async fn on_event(&self, event: &Event) {
        let payload = match event.encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode {} event: {}", event.kind, e);
                return;
            }
        };
        if let Err(e) = self.store.publish(&self.channel, &payload).await {
            warn!("Failed to publish {} event on {}: {}", event.kind, self.channel, e);
        }
    }
}
