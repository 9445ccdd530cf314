//! Queue configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{QueueError, QueueResult};

/// Queue-level configuration.
///
/// `hash_tag_keys` changes key naming, so flipping it on a queue that already
/// holds data makes that data unreachable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Consumer tick interval in milliseconds.
    #[serde(default = "default_fetch_interval_ms")]
    pub fetch_interval_ms: u64,

    /// How long a claimed message may stay unacknowledged, in milliseconds.
    #[serde(default = "default_max_consume_duration_ms")]
    pub max_consume_duration_ms: u64,

    /// Retry budget for messages sent without an override.
    #[serde(default = "default_retry_count")]
    pub default_retry_count: u32,

    /// Maximum messages claimed from one source per cycle (0 = unlimited).
    #[serde(default)]
    pub fetch_limit: u32,

    /// Concurrent handler invocations per cycle.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Payload lifetime after the delivery time, in seconds.
    #[serde(default = "default_message_ttl_secs")]
    pub message_ttl_secs: u64,

    /// Wrap key prefixes in `{}` so all keys of a queue share a hash slot.
    #[serde(default)]
    pub hash_tag_keys: bool,
}

fn default_fetch_interval_ms() -> u64 {
    1000
}

fn default_max_consume_duration_ms() -> u64 {
    5000
}

fn default_retry_count() -> u32 {
    3
}

fn default_concurrency() -> u32 {
    1
}

fn default_message_ttl_secs() -> u64 {
    3600
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            fetch_interval_ms: default_fetch_interval_ms(),
            max_consume_duration_ms: default_max_consume_duration_ms(),
            default_retry_count: default_retry_count(),
            fetch_limit: 0,
            concurrency: default_concurrency(),
            message_ttl_secs: default_message_ttl_secs(),
            hash_tag_keys: false,
        }
    }
}

impl QueueConfig {
    /// Check the configuration once, before a queue is built on it.
    pub fn validate(&self) -> QueueResult<()> {
        if self.fetch_interval_ms == 0 {
            return Err(QueueError::InvalidConfig(
                "fetch_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(QueueError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn fetch_interval(&self) -> Duration {
        Duration::from_millis(self.fetch_interval_ms)
    }

    pub fn max_consume_duration(&self) -> Duration {
        Duration::from_millis(self.max_consume_duration_ms)
    }

    pub fn message_ttl(&self) -> Duration {
        Duration::from_secs(self.message_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.fetch_interval(), Duration::from_secs(1));
        assert_eq!(config.max_consume_duration(), Duration::from_secs(5));
        assert_eq!(config.default_retry_count, 3);
        assert_eq!(config.fetch_limit, 0);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.message_ttl(), Duration::from_secs(3600));
        assert!(!config.hash_tag_keys);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_deserialize_fills_defaults() {
        let config: QueueConfig = serde_json::from_str(r#"{"concurrency": 8}"#).unwrap();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.default_retry_count, 3);
        assert_eq!(config.max_consume_duration_ms, 5000);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = QueueConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(QueueError::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = QueueConfig {
            fetch_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
