//! Key namespace of a queue.

/// Every key a queue touches in the backing store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    prefix: String,
    pub pending: String,
    pub ready: String,
    pub unack: String,
    pub retry: String,
    pub retry_count: String,
    pub garbage: String,
    pub report_channel: String,
}

impl QueueKeys {
    /// Build the namespace for `name`. With `hash_tag` the shared prefix is
    /// wrapped in braces so a sharded store routes all keys to one slot. The
    /// report channel is not a key and keeps the plain name either way.
    pub fn new(name: &str, hash_tag: bool) -> Self {
        let prefix = if hash_tag {
            format!("{{dq:{}}}", name)
        } else {
            format!("dq:{}", name)
        };
        Self {
            pending: format!("{}:pending", prefix),
            ready: format!("{}:ready", prefix),
            unack: format!("{}:unack", prefix),
            retry: format!("{}:retry", prefix),
            retry_count: format!("{}:retry:cnt", prefix),
            garbage: format!("{}:garbage", prefix),
            report_channel: format!("dq:{}:reportEvents", name),
            prefix,
        }
    }

    /// Key of a message payload.
    pub fn message(&self, id: &str) -> String {
        format!("{}:msg:{}", self.prefix, id)
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_keys() {
        let keys = QueueKeys::new("orders", false);
        assert_eq!(keys.pending, "dq:orders:pending");
        assert_eq!(keys.unack, "dq:orders:unack");
        assert_eq!(keys.retry_count, "dq:orders:retry:cnt");
        assert_eq!(keys.garbage, "dq:orders:garbage");
        assert_eq!(keys.report_channel, "dq:orders:reportEvents");
        assert_eq!(keys.message("abc"), "dq:orders:msg:abc");
    }

    #[test]
    fn test_hash_tagged_keys_share_prefix() {
        let keys = QueueKeys::new("orders", true);
        assert_eq!(keys.ready, "{dq:orders}:ready");
        assert_eq!(keys.message("abc"), "{dq:orders}:msg:abc");
        assert_eq!(keys.report_channel, "dq:orders:reportEvents");
        for key in [&keys.pending, &keys.ready, &keys.unack, &keys.retry, &keys.garbage] {
            assert!(key.starts_with("{dq:orders}"));
        }
    }
}
