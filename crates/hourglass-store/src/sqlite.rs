//! SQLite store backend.

#[cfg(test)]
#[path = "sqlite_tests.rs"]
mod tests;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::command::{Command, Commands, Reply, Script};
use crate::error::{StoreError, StoreResult};
use crate::pubsub::{Subscription, DEFAULT_CHANNEL_CAPACITY};
use crate::schema::init_schema;
use crate::store::Store;

const STRING: &str = "string";
const HASH: &str = "hash";
const SET: &str = "set";
const ZSET: &str = "zset";
const LIST: &str = "list";

/// How often a subscription looks for newly published rows.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Rows fetched per poll.
const POLL_BATCH: i64 = 1000;

/// Published rows older than this are trimmed on the next publish.
const PUBSUB_RETENTION: Duration = Duration::from_secs(60);

/// Command set bound to one open transaction.
struct SqlTxn<'a> {
    conn: &'a Connection,
    now: i64,
}

impl SqlTxn<'_> {
    fn evict_expired(&self) -> StoreResult<()> {
        self.conn
            .prepare_cached(
                "DELETE FROM kv WHERE key IN
                 (SELECT key FROM keyspace WHERE expires_at IS NOT NULL AND expires_at <= ?1)",
            )?
            .execute(params![self.now])?;
        self.conn
            .prepare_cached(
                "DELETE FROM keyspace WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            )?
            .execute(params![self.now])?;
        Ok(())
    }

    fn kind(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self
            .conn
            .prepare_cached("SELECT kind FROM keyspace WHERE key = ?1")?
            .query_row(params![key], |row| row.get(0))
            .optional()?)
    }

    /// Whether `key` exists with the given kind. Errors if it holds another kind.
    fn exists_as(&self, key: &str, kind: &str) -> StoreResult<bool> {
        match self.kind(key)? {
            None => Ok(false),
            Some(k) if k == kind => Ok(true),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    /// Register `key` as a collection of `kind` if it does not exist yet.
    fn claim(&self, key: &str, kind: &str) -> StoreResult<()> {
        if !self.exists_as(key, kind)? {
            self.conn
                .prepare_cached("INSERT INTO keyspace (key, kind, expires_at) VALUES (?1, ?2, NULL)")?
                .execute(params![key, kind])?;
        }
        Ok(())
    }

    /// Drop the keyspace row of a collection that became empty.
    fn prune(&self, key: &str, table: &str) -> StoreResult<()> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE key = ?1", table);
        let remaining: i64 = self
            .conn
            .prepare_cached(&sql)?
            .query_row(params![key], |row| row.get(0))?;
        if remaining == 0 {
            self.conn
                .prepare_cached("DELETE FROM keyspace WHERE key = ?1")?
                .execute(params![key])?;
        }
        Ok(())
    }

    fn count(&self, key: &str, kind: &str, table: &str) -> StoreResult<u64> {
        if !self.exists_as(key, kind)? {
            return Ok(0);
        }
        let sql = format!("SELECT COUNT(*) FROM {} WHERE key = ?1", table);
        let n: i64 = self
            .conn
            .prepare_cached(&sql)?
            .query_row(params![key], |row| row.get(0))?;
        Ok(n as u64)
    }

    fn strings(&self, sql: &str, key: &str) -> StoreResult<Vec<String>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params![key], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<String>, _>>()?)
    }
}

fn table_for(kind: &str) -> &'static str {
    match kind {
        HASH => "hashes",
        SET => "sets",
        ZSET => "zsets",
        LIST => "lists",
        _ => "kv",
    }
}

impl Commands for SqlTxn<'_> {
    fn get(&mut self, key: &str) -> StoreResult<Option<String>> {
        if !self.exists_as(key, STRING)? {
            return Ok(None);
        }
        Ok(self
            .conn
            .prepare_cached("SELECT value FROM kv WHERE key = ?1")?
            .query_row(params![key], |row| row.get(0))
            .optional()?)
    }

    fn set_ex(&mut self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        self.del(&[key.to_string()])?;
        let expires_at = self.now + ttl.as_millis() as i64;
        self.conn
            .prepare_cached("INSERT INTO keyspace (key, kind, expires_at) VALUES (?1, ?2, ?3)")?
            .execute(params![key, STRING, expires_at])?;
        self.conn
            .prepare_cached("INSERT INTO kv (key, value) VALUES (?1, ?2)")?
            .execute(params![key, value])?;
        if ttl.is_zero() {
            self.evict_expired()?;
        }
        Ok(())
    }

    fn del(&mut self, keys: &[String]) -> StoreResult<u64> {
        let mut removed = 0;
        for key in keys {
            let Some(kind) = self.kind(key)? else {
                continue;
            };
            let sql = format!("DELETE FROM {} WHERE key = ?1", table_for(&kind));
            self.conn.prepare_cached(&sql)?.execute(params![key])?;
            self.conn
                .prepare_cached("DELETE FROM keyspace WHERE key = ?1")?
                .execute(params![key])?;
            removed += 1;
        }
        Ok(removed)
    }

    fn hset(&mut self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.claim(key, HASH)?;
        self.conn
            .prepare_cached("INSERT OR REPLACE INTO hashes (key, field, value) VALUES (?1, ?2, ?3)")?
            .execute(params![key, field, value])?;
        Ok(())
    }

    fn hdel(&mut self, key: &str, fields: &[String]) -> StoreResult<u64> {
        if !self.exists_as(key, HASH)? {
            return Ok(0);
        }
        let mut removed = 0;
        for field in fields {
            removed += self
                .conn
                .prepare_cached("DELETE FROM hashes WHERE key = ?1 AND field = ?2")?
                .execute(params![key, field])? as u64;
        }
        self.prune(key, "hashes")?;
        Ok(removed)
    }

    fn hmget(&mut self, key: &str, fields: &[String]) -> StoreResult<Vec<Option<String>>> {
        if !self.exists_as(key, HASH)? {
            return Ok(vec![None; fields.len()]);
        }
        let mut stmt = self
            .conn
            .prepare_cached("SELECT value FROM hashes WHERE key = ?1 AND field = ?2")?;
        let mut values = Vec::with_capacity(fields.len());
        for field in fields {
            values.push(
                stmt.query_row(params![key, field], |row| row.get(0))
                    .optional()?,
            );
        }
        Ok(values)
    }

    fn hincr_by(&mut self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        self.claim(key, HASH)?;
        let current: Option<String> = self
            .conn
            .prepare_cached("SELECT value FROM hashes WHERE key = ?1 AND field = ?2")?
            .query_row(params![key, field], |row| row.get(0))
            .optional()?;
        let current = match current {
            Some(raw) => raw.parse::<i64>().map_err(|_| StoreError::InvalidValue {
                key: format!("{}/{}", key, field),
                message: format!("not an integer: {:?}", raw),
            })?,
            None => 0,
        };
        let updated = current + delta;
        self.hset(key, field, &updated.to_string())?;
        Ok(updated)
    }

    fn hlen(&mut self, key: &str) -> StoreResult<u64> {
        self.count(key, HASH, "hashes")
    }

    fn sadd(&mut self, key: &str, members: &[String]) -> StoreResult<u64> {
        self.claim(key, SET)?;
        let mut added = 0;
        for member in members {
            added += self
                .conn
                .prepare_cached("INSERT OR IGNORE INTO sets (key, member) VALUES (?1, ?2)")?
                .execute(params![key, member])? as u64;
        }
        self.prune(key, "sets")?;
        Ok(added)
    }

    fn srem(&mut self, key: &str, members: &[String]) -> StoreResult<u64> {
        if !self.exists_as(key, SET)? {
            return Ok(0);
        }
        let mut removed = 0;
        for member in members {
            removed += self
                .conn
                .prepare_cached("DELETE FROM sets WHERE key = ?1 AND member = ?2")?
                .execute(params![key, member])? as u64;
        }
        self.prune(key, "sets")?;
        Ok(removed)
    }

    fn smembers(&mut self, key: &str) -> StoreResult<Vec<String>> {
        if !self.exists_as(key, SET)? {
            return Ok(Vec::new());
        }
        self.strings("SELECT member FROM sets WHERE key = ?1 ORDER BY member", key)
    }

    fn scard(&mut self, key: &str) -> StoreResult<u64> {
        self.count(key, SET, "sets")
    }

    fn zadd(&mut self, key: &str, members: &[(String, i64)]) -> StoreResult<u64> {
        self.claim(key, ZSET)?;
        let mut added = 0;
        for (member, score) in members {
            if self.zscore(key, member)?.is_none() {
                added += 1;
            }
            self.conn
                .prepare_cached("INSERT OR REPLACE INTO zsets (key, member, score) VALUES (?1, ?2, ?3)")?
                .execute(params![key, member, score])?;
        }
        self.prune(key, "zsets")?;
        Ok(added)
    }

    fn zrem(&mut self, key: &str, members: &[String]) -> StoreResult<u64> {
        if !self.exists_as(key, ZSET)? {
            return Ok(0);
        }
        let mut removed = 0;
        for member in members {
            removed += self
                .conn
                .prepare_cached("DELETE FROM zsets WHERE key = ?1 AND member = ?2")?
                .execute(params![key, member])? as u64;
        }
        self.prune(key, "zsets")?;
        Ok(removed)
    }

    fn zscore(&mut self, key: &str, member: &str) -> StoreResult<Option<i64>> {
        if !self.exists_as(key, ZSET)? {
            return Ok(None);
        }
        Ok(self
            .conn
            .prepare_cached("SELECT score FROM zsets WHERE key = ?1 AND member = ?2")?
            .query_row(params![key, member], |row| row.get(0))
            .optional()?)
    }

    fn zrange_by_score(&mut self, key: &str, min: i64, max: i64) -> StoreResult<Vec<String>> {
        if !self.exists_as(key, ZSET)? {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare_cached(
            "SELECT member FROM zsets WHERE key = ?1 AND score BETWEEN ?2 AND ?3
             ORDER BY score, member",
        )?;
        let rows = stmt.query_map(params![key, min, max], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<String>, _>>()?)
    }

    fn zrem_range_by_score(&mut self, key: &str, min: i64, max: i64) -> StoreResult<u64> {
        if !self.exists_as(key, ZSET)? {
            return Ok(0);
        }
        let removed = self
            .conn
            .prepare_cached("DELETE FROM zsets WHERE key = ?1 AND score BETWEEN ?2 AND ?3")?
            .execute(params![key, min, max])?;
        self.prune(key, "zsets")?;
        Ok(removed as u64)
    }

    fn zcard(&mut self, key: &str) -> StoreResult<u64> {
        self.count(key, ZSET, "zsets")
    }

    fn lpush(&mut self, key: &str, values: &[String]) -> StoreResult<u64> {
        self.claim(key, LIST)?;
        let head: Option<i64> = self
            .conn
            .prepare_cached("SELECT MIN(seq) FROM lists WHERE key = ?1")?
            .query_row(params![key], |row| row.get(0))?;
        let mut seq = head.unwrap_or(0);
        for value in values {
            seq -= 1;
            self.conn
                .prepare_cached("INSERT INTO lists (key, seq, value) VALUES (?1, ?2, ?3)")?
                .execute(params![key, seq, value])?;
        }
        self.prune(key, "lists")?;
        self.llen(key)
    }

    fn rpop(&mut self, key: &str) -> StoreResult<Option<String>> {
        if !self.exists_as(key, LIST)? {
            return Ok(None);
        }
        let tail: Option<(i64, String)> = self
            .conn
            .prepare_cached("SELECT seq, value FROM lists WHERE key = ?1 ORDER BY seq DESC LIMIT 1")?
            .query_row(params![key], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?;
        let Some((seq, value)) = tail else {
            return Ok(None);
        };
        self.conn
            .prepare_cached("DELETE FROM lists WHERE key = ?1 AND seq = ?2")?
            .execute(params![key, seq])?;
        self.prune(key, "lists")?;
        Ok(Some(value))
    }

    fn llen(&mut self, key: &str) -> StoreResult<u64> {
        self.count(key, LIST, "lists")
    }
}

/// SQLite-backed store.
///
/// Every command and script runs inside one `IMMEDIATE` transaction, so
/// several processes can share a database file. A script that fails is rolled
/// back entirely. Published messages are appended to the `pubsub` table and
/// every subscription polls it, so subscribers in other processes on the same
/// file receive them too.
pub struct SqliteStore {
    conn: tokio_rusqlite::Connection,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    /// Create a new in-memory database.
    pub async fn in_memory() -> StoreResult<Self> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    /// Create or open a file-backed database.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        debug!("Opening sqlite store at {}", path.display());
        let conn = tokio_rusqlite::Connection::open(path).await?;
        Self::init(conn).await
    }

    async fn init(conn: tokio_rusqlite::Connection) -> StoreResult<Self> {
        conn.call(|conn| init_schema(conn)).await?;
        Ok(Self {
            conn,
            clock: Arc::new(SystemClock),
        })
    }

    /// Use a custom clock for expiry.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    async fn atomically<R, F>(&self, work: F) -> StoreResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut dyn Commands) -> StoreResult<R> + Send + 'static,
    {
        let now = self.clock.now_millis();
        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let outcome = {
                    let mut txn = SqlTxn { conn: &tx, now };
                    txn.evict_expired().and_then(|_| work(&mut txn))
                };
                // Dropping an uncommitted transaction rolls it back.
                if outcome.is_ok() {
                    tx.commit()?;
                }
                Ok(outcome)
            })
            .await?;
        outcome
    }
}

#[async_trait]
impl Store for SqliteStore {
    fn id(&self) -> &str {
        "sqlite"
    }

    fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    async fn execute(&self, command: Command) -> StoreResult<Reply> {
        self.atomically(move |cmd| command.apply(cmd)).await
    }

    async fn eval(
        &self,
        script: Arc<dyn Script>,
        keys: Vec<String>,
        args: Vec<i64>,
    ) -> StoreResult<Reply> {
        debug!("Running script {} on {} keys", script.name(), keys.len());
        self.atomically(move |cmd| script.run(cmd, &keys, &args)).await
    }

    async fn publish(&self, channel: &str, message: &str) -> StoreResult<usize> {
        let now = self.clock.now_millis();
        let cutoff = now - PUBSUB_RETENTION.as_millis() as i64;
        let channel = channel.to_string();
        let message = message.to_string();
        let written = self
            .conn
            .call(move |conn| {
                conn.prepare_cached("DELETE FROM pubsub WHERE published_at < ?1")?
                    .execute(params![cutoff])?;
                let written = conn
                    .prepare_cached(
                        "INSERT INTO pubsub (channel, payload, published_at) VALUES (?1, ?2, ?3)",
                    )?
                    .execute(params![channel, message, now])?;
                Ok(written)
            })
            .await?;
        Ok(written)
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<Subscription> {
        let tail = self
            .conn
            .call(|conn| {
                let seq = conn.query_row("SELECT COALESCE(MAX(seq), 0) FROM pubsub", [], |row| {
                    row.get::<_, i64>(0)
                })?;
                Ok(seq)
            })
            .await?;

        let (tx, rx) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        tokio::spawn(poll_channel(
            self.conn.clone(),
            channel.to_string(),
            tail,
            tx,
        ));
        debug!("New subscriber on channel {} from seq {}", channel, tail);
        Ok(Subscription::new(channel.to_string(), rx))
    }
}

/// Forward rows published on `channel` after `last_seq` until the
/// subscription is dropped.
async fn poll_channel(
    conn: tokio_rusqlite::Connection,
    channel: String,
    mut last_seq: i64,
    tx: broadcast::Sender<String>,
) {
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if tx.receiver_count() == 0 {
            break;
        }

        let name = channel.clone();
        let rows = conn
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT seq, payload FROM pubsub
                     WHERE channel = ?1 AND seq > ?2 ORDER BY seq LIMIT ?3",
                )?;
                let rows = stmt
                    .query_map(params![name, last_seq, POLL_BATCH], |row| {
                        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await;

        match rows {
            Ok(rows) => {
                for (seq, payload) in rows {
                    last_seq = seq;
                    if tx.send(payload).is_err() {
                        return;
                    }
                }
            }
            Err(tokio_rusqlite::Error::ConnectionClosed) => break,
            Err(e) => warn!("Polling channel {} failed: {}", channel, e),
        }
    }
    debug!("Stopped polling channel {}", channel);
}
