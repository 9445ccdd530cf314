//! The storage capability trait.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::clock::Clock;
use crate::command::{reply_count, Command, Reply, Script};
use crate::error::StoreResult;
use crate::pubsub::Subscription;

/// Storage capability required by the queue engine.
///
/// Implementations must be thread-safe and must execute every [`Command`] and
/// every [`Script`] as one indivisible step relative to all other callers
/// sharing the same data.
#[async_trait]
pub trait Store: Send + Sync {
    /// Backend identifier.
    fn id(&self) -> &str;

    /// Clock used for expiry. Callers computing scores should use it too.
    fn clock(&self) -> Arc<dyn Clock>;

    /// Execute a single primitive command.
    async fn execute(&self, command: Command) -> StoreResult<Reply>;

    /// Execute a script atomically.
    async fn eval(
        &self,
        script: Arc<dyn Script>,
        keys: Vec<String>,
        args: Vec<i64>,
    ) -> StoreResult<Reply>;

    /// Broadcast a message. In-process backends return the number of
    /// subscribers reached, durable ones the number of messages recorded.
    async fn publish(&self, channel: &str, message: &str) -> StoreResult<usize>;

    /// Subscribe to a broadcast channel.
    async fn subscribe(&self, channel: &str) -> StoreResult<Subscription>;
}

/// Typed helpers over [`Store::execute`].
#[async_trait]
pub trait StoreExt: Store {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.execute(Command::Get { key: key.to_string() })
            .await?
            .into_opt_string()
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        self.execute(Command::SetEx {
            key: key.to_string(),
            value: value.to_string(),
            ttl,
        })
        .await?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> StoreResult<u64> {
        reply_count(self.execute(Command::Del { keys: keys.to_vec() }).await?)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.execute(Command::HSet {
            key: key.to_string(),
            field: field.to_string(),
            value: value.to_string(),
        })
        .await?;
        Ok(())
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> StoreResult<u64> {
        reply_count(
            self.execute(Command::HDel {
                key: key.to_string(),
                fields: fields.to_vec(),
            })
            .await?,
        )
    }

    async fn hmget(&self, key: &str, fields: &[String]) -> StoreResult<Vec<Option<String>>> {
        self.execute(Command::HMGet {
            key: key.to_string(),
            fields: fields.to_vec(),
        })
        .await?
        .into_opt_strings()
    }

    async fn hlen(&self, key: &str) -> StoreResult<u64> {
        reply_count(self.execute(Command::HLen { key: key.to_string() }).await?)
    }

    async fn srem(&self, key: &str, members: &[String]) -> StoreResult<u64> {
        reply_count(
            self.execute(Command::SRem {
                key: key.to_string(),
                members: members.to_vec(),
            })
            .await?,
        )
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        self.execute(Command::SMembers { key: key.to_string() })
            .await?
            .into_strings()
    }

    async fn scard(&self, key: &str) -> StoreResult<u64> {
        reply_count(self.execute(Command::SCard { key: key.to_string() }).await?)
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> StoreResult<u64> {
        reply_count(
            self.execute(Command::ZAdd {
                key: key.to_string(),
                members: vec![(member.to_string(), score)],
            })
            .await?,
        )
    }

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<u64> {
        reply_count(
            self.execute(Command::ZRem {
                key: key.to_string(),
                members: vec![member.to_string()],
            })
            .await?,
        )
    }

    async fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<i64>> {
        self.execute(Command::ZScore {
            key: key.to_string(),
            member: member.to_string(),
        })
        .await?
        .into_opt_int()
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        reply_count(self.execute(Command::ZCard { key: key.to_string() }).await?)
    }

    async fn llen(&self, key: &str) -> StoreResult<u64> {
        reply_count(self.execute(Command::LLen { key: key.to_string() }).await?)
    }
}

impl<S: Store + ?Sized> StoreExt for S {}
