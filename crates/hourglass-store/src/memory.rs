//! In-process store.

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::command::{Command, Commands, Reply, Script};
use crate::error::{StoreError, StoreResult};
use crate::pubsub::{PubSubBus, Subscription};
use crate::store::Store;

/// Sorted set: members indexed both by name and by `(score, member)`.
#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<String, i64>,
    ordered: BTreeSet<(i64, String)>,
}

impl SortedSet {
    fn insert(&mut self, member: &str, score: i64) -> bool {
        match self.scores.insert(member.to_string(), score) {
            Some(old) => {
                self.ordered.remove(&(old, member.to_string()));
                self.ordered.insert((score, member.to_string()));
                false
            }
            None => {
                self.ordered.insert((score, member.to_string()));
                true
            }
        }
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.ordered.remove(&(score, member.to_string()));
                true
            }
            None => false,
        }
    }

    fn range(&self, min: i64, max: i64) -> Vec<String> {
        if min > max {
            return Vec::new();
        }
        self.ordered
            .range((min, String::new())..)
            .take_while(|(score, _)| *score <= max)
            .map(|(_, member)| member.clone())
            .collect()
    }

    fn len(&self) -> usize {
        self.scores.len()
    }
}

#[derive(Debug)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
    ZSet(SortedSet),
    List(VecDeque<String>),
}

impl Value {
    fn is_empty(&self) -> bool {
        match self {
            Value::Str(_) => false,
            Value::Hash(h) => h.is_empty(),
            Value::Set(s) => s.is_empty(),
            Value::ZSet(z) => z.len() == 0,
            Value::List(l) => l.is_empty(),
        }
    }
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

/// All keys plus an index of pending expirations.
#[derive(Debug, Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
    expirations: BTreeSet<(DateTime<Utc>, String)>,
}

impl Keyspace {
    /// Drop every entry whose expiry has passed.
    fn evict_expired(&mut self, now: DateTime<Utc>) {
        while let Some((at, key)) = self.expirations.first().cloned() {
            if at > now {
                break;
            }
            self.expirations.pop_first();
            // The index may hold stale pairs for keys rewritten since.
            let still_due = self
                .entries
                .get(&key)
                .is_some_and(|entry| entry.expires_at == Some(at));
            if still_due {
                self.entries.remove(&key);
            }
        }
    }
}

macro_rules! typed {
    ($fn_name:ident, $fn_name_mut:ident, $variant:ident, $ty:ty) => {
        fn $fn_name(&self, key: &str) -> StoreResult<Option<&$ty>> {
            match self.space.entries.get(key) {
                None => Ok(None),
                Some(Entry { value: Value::$variant(v), .. }) => Ok(Some(v)),
                Some(_) => Err(StoreError::WrongType(key.to_string())),
            }
        }

        fn $fn_name_mut(&mut self, key: &str) -> StoreResult<&mut $ty> {
            let entry = self
                .space
                .entries
                .entry(key.to_string())
                .or_insert_with(|| Entry {
                    value: Value::$variant(Default::default()),
                    expires_at: None,
                });
            match &mut entry.value {
                Value::$variant(v) => Ok(v),
                _ => Err(StoreError::WrongType(key.to_string())),
            }
        }
    };
}

/// Command set over a locked keyspace.
struct Txn<'a> {
    space: &'a mut Keyspace,
    now: DateTime<Utc>,
}

impl Txn<'_> {
    typed!(hash, hash_mut, Hash, HashMap<String, String>);
    typed!(set, set_mut, Set, HashSet<String>);
    typed!(zset, zset_mut, ZSet, SortedSet);
    typed!(list, list_mut, List, VecDeque<String>);

    /// Remove a collection that became empty.
    fn prune(&mut self, key: &str) {
        if self
            .space
            .entries
            .get(key)
            .is_some_and(|entry| entry.value.is_empty())
        {
            self.space.entries.remove(key);
        }
    }
}

impl Commands for Txn<'_> {
    fn get(&mut self, key: &str) -> StoreResult<Option<String>> {
        match self.space.entries.get(key) {
            None => Ok(None),
            Some(Entry { value: Value::Str(s), .. }) => Ok(Some(s.clone())),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn set_ex(&mut self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let expires_at = self.now + chrono::Duration::milliseconds(ttl.as_millis() as i64);
        self.space.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(expires_at),
            },
        );
        self.space.expirations.insert((expires_at, key.to_string()));
        // A zero TTL expires on the spot.
        self.space.evict_expired(self.now);
        Ok(())
    }

    fn del(&mut self, keys: &[String]) -> StoreResult<u64> {
        Ok(keys
            .iter()
            .filter(|key| self.space.entries.remove(key.as_str()).is_some())
            .count() as u64)
    }

    fn hset(&mut self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.hash_mut(key)?.insert(field.to_string(), value.to_string());
        Ok(())
    }

    fn hdel(&mut self, key: &str, fields: &[String]) -> StoreResult<u64> {
        if self.hash(key)?.is_none() {
            return Ok(0);
        }
        let hash = self.hash_mut(key)?;
        let removed = fields.iter().filter(|f| hash.remove(f.as_str()).is_some()).count();
        self.prune(key);
        Ok(removed as u64)
    }

    fn hmget(&mut self, key: &str, fields: &[String]) -> StoreResult<Vec<Option<String>>> {
        let hash = self.hash(key)?;
        Ok(fields
            .iter()
            .map(|f| hash.and_then(|h| h.get(f).cloned()))
            .collect())
    }

    fn hincr_by(&mut self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        let hash = self.hash_mut(key)?;
        let current = match hash.get(field) {
            Some(raw) => raw.parse::<i64>().map_err(|_| StoreError::InvalidValue {
                key: format!("{}/{}", key, field),
                message: format!("not an integer: {:?}", raw),
            })?,
            None => 0,
        };
        let updated = current + delta;
        hash.insert(field.to_string(), updated.to_string());
        Ok(updated)
    }

    fn hlen(&mut self, key: &str) -> StoreResult<u64> {
        Ok(self.hash(key)?.map_or(0, |h| h.len() as u64))
    }

    fn sadd(&mut self, key: &str, members: &[String]) -> StoreResult<u64> {
        let set = self.set_mut(key)?;
        let added = members.iter().filter(|m| set.insert((*m).clone())).count();
        self.prune(key);
        Ok(added as u64)
    }

    fn srem(&mut self, key: &str, members: &[String]) -> StoreResult<u64> {
        if self.set(key)?.is_none() {
            return Ok(0);
        }
        let set = self.set_mut(key)?;
        let removed = members.iter().filter(|m| set.remove(m.as_str())).count();
        self.prune(key);
        Ok(removed as u64)
    }

    fn smembers(&mut self, key: &str) -> StoreResult<Vec<String>> {
        let mut members: Vec<String> = self
            .set(key)?
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        Ok(members)
    }

    fn scard(&mut self, key: &str) -> StoreResult<u64> {
        Ok(self.set(key)?.map_or(0, |s| s.len() as u64))
    }

    fn zadd(&mut self, key: &str, members: &[(String, i64)]) -> StoreResult<u64> {
        let zset = self.zset_mut(key)?;
        let added = members
            .iter()
            .filter(|(member, score)| zset.insert(member, *score))
            .count();
        self.prune(key);
        Ok(added as u64)
    }

    fn zrem(&mut self, key: &str, members: &[String]) -> StoreResult<u64> {
        if self.zset(key)?.is_none() {
            return Ok(0);
        }
        let zset = self.zset_mut(key)?;
        let removed = members.iter().filter(|m| zset.remove(m)).count();
        self.prune(key);
        Ok(removed as u64)
    }

    fn zscore(&mut self, key: &str, member: &str) -> StoreResult<Option<i64>> {
        Ok(self.zset(key)?.and_then(|z| z.scores.get(member).copied()))
    }

    fn zrange_by_score(&mut self, key: &str, min: i64, max: i64) -> StoreResult<Vec<String>> {
        Ok(self.zset(key)?.map(|z| z.range(min, max)).unwrap_or_default())
    }

    fn zrem_range_by_score(&mut self, key: &str, min: i64, max: i64) -> StoreResult<u64> {
        let doomed = self.zrange_by_score(key, min, max)?;
        if doomed.is_empty() {
            return Ok(0);
        }
        self.zrem(key, &doomed)
    }

    fn zcard(&mut self, key: &str) -> StoreResult<u64> {
        Ok(self.zset(key)?.map_or(0, |z| z.len() as u64))
    }

    fn lpush(&mut self, key: &str, values: &[String]) -> StoreResult<u64> {
        let list = self.list_mut(key)?;
        for value in values {
            list.push_front(value.clone());
        }
        let len = list.len() as u64;
        self.prune(key);
        Ok(len)
    }

    fn rpop(&mut self, key: &str) -> StoreResult<Option<String>> {
        if self.list(key)?.is_none() {
            return Ok(None);
        }
        let popped = self.list_mut(key)?.pop_back();
        self.prune(key);
        Ok(popped)
    }

    fn llen(&mut self, key: &str) -> StoreResult<u64> {
        Ok(self.list(key)?.map_or(0, |l| l.len() as u64))
    }
}

/// In-process store.
///
/// Every command and script runs under one mutex, which gives scripts the same
/// all-or-nothing visibility a scripting key-value server provides. A script
/// that fails midway keeps the writes it already made.
pub struct MemoryStore {
    space: Mutex<Keyspace>,
    clock: Arc<dyn Clock>,
    bus: PubSubBus,
}

impl MemoryStore {
    /// Create an empty store on the wall clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store on a custom clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            space: Mutex::new(Keyspace::default()),
            clock,
            bus: PubSubBus::new(),
        }
    }

    /// Number of live keys.
    pub fn key_count(&self) -> usize {
        let mut space = self.space.lock();
        space.evict_expired(self.clock.now());
        space.entries.len()
    }

    fn atomically<R>(&self, f: impl FnOnce(&mut dyn Commands) -> StoreResult<R>) -> StoreResult<R> {
        let now = self.clock.now();
        let mut space = self.space.lock();
        space.evict_expired(now);
        let mut txn = Txn {
            space: &mut *space,
            now,
        };
        f(&mut txn)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn id(&self) -> &str {
        "memory"
    }

    fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    async fn execute(&self, command: Command) -> StoreResult<Reply> {
        self.atomically(|cmd| command.apply(cmd))
    }

    async fn eval(
        &self,
        script: Arc<dyn Script>,
        keys: Vec<String>,
        args: Vec<i64>,
    ) -> StoreResult<Reply> {
        debug!("Running script {} on {} keys", script.name(), keys.len());
        self.atomically(|cmd| script.run(cmd, &keys, &args))
    }

    async fn publish(&self, channel: &str, message: &str) -> StoreResult<usize> {
        Ok(self.bus.publish(channel, message))
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<Subscription> {
        Ok(self.bus.subscribe(channel))
    }
}
