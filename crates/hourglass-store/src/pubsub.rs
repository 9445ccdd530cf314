//! In-process publish/subscribe hub.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

/// Default per-channel buffer size.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 8192;

/// Broadcast hub keyed by channel name.
///
/// Messages published while a channel has no subscribers are dropped.
pub struct PubSubBus {
    capacity: usize,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl PubSubBus {
    /// Create a hub with the default buffer size.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a hub whose channels buffer up to `capacity` messages per
    /// subscriber.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Publish a message, returning how many subscribers received it.
    ///
    /// A channel whose last subscriber has gone is dropped from the hub.
    pub fn publish(&self, channel: &str, message: &str) -> usize {
        let mut channels = self.channels.lock();
        let Some(sender) = channels.get(channel) else {
            return 0;
        };
        if sender.receiver_count() == 0 {
            channels.remove(channel);
            debug!("Dropped idle channel {}", channel);
            return 0;
        }
        sender.send(message.to_string()).unwrap_or(0)
    }

    /// Subscribe to a channel.
    pub fn subscribe(&self, channel: &str) -> Subscription {
        let mut channels = self.channels.lock();
        let sender = channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        debug!("New subscriber on channel {}", channel);
        Subscription::new(channel.to_string(), sender.subscribe())
    }

    /// Number of live subscribers on a channel.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .get(channel)
            .map_or(0, |sender| sender.receiver_count())
    }
}

impl Default for PubSubBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of a channel subscription. Dropping it unsubscribes.
pub struct Subscription {
    channel: String,
    rx: broadcast::Receiver<String>,
}

impl Subscription {
    pub(crate) fn new(channel: String, rx: broadcast::Receiver<String>) -> Self {
        Self { channel, rx }
    }

    /// Channel name.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next message. Returns `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<String> {
        loop {
            match self.rx.recv().await {
                Ok(message) => return Some(message),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        "Subscriber on {} lagged, {} messages skipped",
                        self.channel, skipped
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = PubSubBus::new();
        assert_eq!(bus.publish("events", "hello"), 0);
    }

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let bus = PubSubBus::new();
        let mut a = bus.subscribe("events");
        let mut b = bus.subscribe("events");
        let mut other = bus.subscribe("other");

        assert_eq!(bus.publish("events", "hello"), 2);
        assert_eq!(a.recv().await.as_deref(), Some("hello"));
        assert_eq!(b.recv().await.as_deref(), Some("hello"));

        bus.publish("other", "x");
        assert_eq!(other.recv().await.as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn test_dropped_subscription_unsubscribes() {
        let bus = PubSubBus::new();
        let sub = bus.subscribe("events");
        assert_eq!(bus.subscriber_count("events"), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count("events"), 0);
        assert_eq!(bus.publish("events", "lost"), 0);
        assert!(bus.channels.lock().is_empty());

        // A later subscriber gets a fresh channel.
        let mut sub = bus.subscribe("events");
        assert_eq!(bus.publish("events", "again"), 1);
        assert_eq!(sub.recv().await.as_deref(), Some("again"));
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_ahead() {
        let bus = PubSubBus::with_capacity(2);
        let mut sub = bus.subscribe("events");
        for i in 0..5 {
            bus.publish("events", &i.to_string());
        }
        // Oldest messages were overwritten; the subscriber resumes with what is left.
        assert_eq!(sub.recv().await.as_deref(), Some("3"));
        assert_eq!(sub.recv().await.as_deref(), Some("4"));
    }
}
