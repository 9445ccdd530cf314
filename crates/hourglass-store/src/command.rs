//! Primitive command set, replies and atomic scripts.

use std::time::Duration;

use crate::error::{StoreError, StoreResult};

/// Primitive operations available inside an atomic context.
///
/// A backend hands a `Commands` implementation to a [`Script`] (or a single
/// [`Command`]) while holding whatever lock or transaction makes the whole
/// call indivisible. Empty hashes, sets, sorted sets and lists cease to exist.
pub trait Commands {
    /// Read a scalar. Expired scalars read as absent.
    fn get(&mut self, key: &str) -> StoreResult<Option<String>>;

    /// Write a scalar that expires after `ttl`.
    fn set_ex(&mut self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// Delete keys of any type, returning how many existed.
    fn del(&mut self, keys: &[String]) -> StoreResult<u64>;

    /// Set a hash field.
    fn hset(&mut self, key: &str, field: &str, value: &str) -> StoreResult<()>;

    /// Delete hash fields, returning how many existed.
    fn hdel(&mut self, key: &str, fields: &[String]) -> StoreResult<u64>;

    /// Read several hash fields at once.
    fn hmget(&mut self, key: &str, fields: &[String]) -> StoreResult<Vec<Option<String>>>;

    /// Add `delta` to an integer hash field (missing fields start at 0).
    fn hincr_by(&mut self, key: &str, field: &str, delta: i64) -> StoreResult<i64>;

    /// Number of fields in a hash.
    fn hlen(&mut self, key: &str) -> StoreResult<u64>;

    /// Add set members, returning how many were new.
    fn sadd(&mut self, key: &str, members: &[String]) -> StoreResult<u64>;

    /// Remove set members, returning how many existed.
    fn srem(&mut self, key: &str, members: &[String]) -> StoreResult<u64>;

    /// All members of a set.
    fn smembers(&mut self, key: &str) -> StoreResult<Vec<String>>;

    /// Number of members in a set.
    fn scard(&mut self, key: &str) -> StoreResult<u64>;

    /// Add or re-score sorted set members, returning how many were new.
    fn zadd(&mut self, key: &str, members: &[(String, i64)]) -> StoreResult<u64>;

    /// Remove sorted set members, returning how many existed.
    fn zrem(&mut self, key: &str, members: &[String]) -> StoreResult<u64>;

    /// Score of a sorted set member.
    fn zscore(&mut self, key: &str, member: &str) -> StoreResult<Option<i64>>;

    /// Members with `min <= score <= max`, lowest score first.
    fn zrange_by_score(&mut self, key: &str, min: i64, max: i64) -> StoreResult<Vec<String>>;

    /// Remove members with `min <= score <= max`, returning how many.
    fn zrem_range_by_score(&mut self, key: &str, min: i64, max: i64) -> StoreResult<u64>;

    /// Number of members in a sorted set.
    fn zcard(&mut self, key: &str) -> StoreResult<u64>;

    /// Push values onto the head of a list, returning the new length.
    fn lpush(&mut self, key: &str, values: &[String]) -> StoreResult<u64>;

    /// Pop one value from the tail of a list.
    fn rpop(&mut self, key: &str) -> StoreResult<Option<String>>;

    /// Length of a list.
    fn llen(&mut self, key: &str) -> StoreResult<u64>;
}

/// Reply produced by a command or script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// No value.
    Nil,
    /// Integer value.
    Int(i64),
    /// String value.
    Bulk(String),
    /// Sequence of replies.
    Array(Vec<Reply>),
}

impl Reply {
    /// Interpret as a count. `Nil` counts as zero.
    pub fn as_count(&self) -> Option<u64> {
        match self {
            Reply::Nil => Some(0),
            Reply::Int(n) => u64::try_from(*n).ok(),
            _ => None,
        }
    }

    /// Interpret as an optional string.
    pub fn into_opt_string(self) -> StoreResult<Option<String>> {
        match self {
            Reply::Nil => Ok(None),
            Reply::Bulk(s) => Ok(Some(s)),
            other => Err(unexpected("string", &other)),
        }
    }

    /// Interpret as a list of strings.
    pub fn into_strings(self) -> StoreResult<Vec<String>> {
        match self {
            Reply::Nil => Ok(Vec::new()),
            Reply::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Reply::Bulk(s) => Ok(s),
                    other => Err(unexpected("string", &other)),
                })
                .collect(),
            other => Err(unexpected("array", &other)),
        }
    }

    /// Interpret as a list of optional strings.
    pub fn into_opt_strings(self) -> StoreResult<Vec<Option<String>>> {
        match self {
            Reply::Array(items) => items.into_iter().map(Reply::into_opt_string).collect(),
            other => Err(unexpected("array", &other)),
        }
    }

    /// Interpret as an optional integer.
    pub fn into_opt_int(self) -> StoreResult<Option<i64>> {
        match self {
            Reply::Nil => Ok(None),
            Reply::Int(n) => Ok(Some(n)),
            other => Err(unexpected("integer", &other)),
        }
    }

    fn count(self) -> StoreResult<u64> {
        let count = self.as_count();
        count.ok_or_else(|| unexpected("count", &self))
    }
}

fn unexpected(expected: &str, got: &Reply) -> StoreError {
    StoreError::Custom(format!("expected {} reply, got {:?}", expected, got))
}

fn strings(values: Vec<String>) -> Reply {
    Reply::Array(values.into_iter().map(Reply::Bulk).collect())
}

fn opt_string(value: Option<String>) -> Reply {
    value.map_or(Reply::Nil, Reply::Bulk)
}

fn int(n: u64) -> Reply {
    Reply::Int(n as i64)
}

/// A single primitive call in owned form, so it can cross into a backend task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Get { key: String },
    SetEx { key: String, value: String, ttl: Duration },
    Del { keys: Vec<String> },
    HSet { key: String, field: String, value: String },
    HDel { key: String, fields: Vec<String> },
    HMGet { key: String, fields: Vec<String> },
    HIncrBy { key: String, field: String, delta: i64 },
    HLen { key: String },
    SAdd { key: String, members: Vec<String> },
    SRem { key: String, members: Vec<String> },
    SMembers { key: String },
    SCard { key: String },
    ZAdd { key: String, members: Vec<(String, i64)> },
    ZRem { key: String, members: Vec<String> },
    ZScore { key: String, member: String },
    ZRangeByScore { key: String, min: i64, max: i64 },
    ZRemRangeByScore { key: String, min: i64, max: i64 },
    ZCard { key: String },
    LPush { key: String, values: Vec<String> },
    RPop { key: String },
    LLen { key: String },
}

impl Command {
    /// Command name, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Get { .. } => "GET",
            Command::SetEx { .. } => "SETEX",
            Command::Del { .. } => "DEL",
            Command::HSet { .. } => "HSET",
            Command::HDel { .. } => "HDEL",
            Command::HMGet { .. } => "HMGET",
            Command::HIncrBy { .. } => "HINCRBY",
            Command::HLen { .. } => "HLEN",
            Command::SAdd { .. } => "SADD",
            Command::SRem { .. } => "SREM",
            Command::SMembers { .. } => "SMEMBERS",
            Command::SCard { .. } => "SCARD",
            Command::ZAdd { .. } => "ZADD",
            Command::ZRem { .. } => "ZREM",
            Command::ZScore { .. } => "ZSCORE",
            Command::ZRangeByScore { .. } => "ZRANGEBYSCORE",
            Command::ZRemRangeByScore { .. } => "ZREMRANGEBYSCORE",
            Command::ZCard { .. } => "ZCARD",
            Command::LPush { .. } => "LPUSH",
            Command::RPop { .. } => "RPOP",
            Command::LLen { .. } => "LLEN",
        }
    }

    /// Run this command against a backend's command set.
    pub fn apply(&self, cmd: &mut dyn Commands) -> StoreResult<Reply> {
        Ok(match self {
            Command::Get { key } => opt_string(cmd.get(key)?),
            Command::SetEx { key, value, ttl } => {
                cmd.set_ex(key, value, *ttl)?;
                Reply::Bulk("OK".to_string())
            }
            Command::Del { keys } => int(cmd.del(keys)?),
            Command::HSet { key, field, value } => {
                cmd.hset(key, field, value)?;
                Reply::Int(1)
            }
            Command::HDel { key, fields } => int(cmd.hdel(key, fields)?),
            Command::HMGet { key, fields } => {
                Reply::Array(cmd.hmget(key, fields)?.into_iter().map(opt_string).collect())
            }
            Command::HIncrBy { key, field, delta } => Reply::Int(cmd.hincr_by(key, field, *delta)?),
            Command::HLen { key } => int(cmd.hlen(key)?),
            Command::SAdd { key, members } => int(cmd.sadd(key, members)?),
            Command::SRem { key, members } => int(cmd.srem(key, members)?),
            Command::SMembers { key } => strings(cmd.smembers(key)?),
            Command::SCard { key } => int(cmd.scard(key)?),
            Command::ZAdd { key, members } => int(cmd.zadd(key, members)?),
            Command::ZRem { key, members } => int(cmd.zrem(key, members)?),
            Command::ZScore { key, member } => cmd.zscore(key, member)?.map_or(Reply::Nil, Reply::Int),
            Command::ZRangeByScore { key, min, max } => strings(cmd.zrange_by_score(key, *min, *max)?),
            Command::ZRemRangeByScore { key, min, max } => int(cmd.zrem_range_by_score(key, *min, *max)?),
            Command::ZCard { key } => int(cmd.zcard(key)?),
            Command::LPush { key, values } => int(cmd.lpush(key, values)?),
            Command::RPop { key } => opt_string(cmd.rpop(key)?),
            Command::LLen { key } => int(cmd.llen(key)?),
        })
    }
}

/// Decode a count reply.
pub(crate) fn reply_count(reply: Reply) -> StoreResult<u64> {
    reply.count()
}

/// A unit of work executed atomically by a store.
///
/// No other command or script observes the keyspace between the first and the
/// last primitive a script issues.
pub trait Script: Send + Sync {
    /// Script name, for logs and errors.
    fn name(&self) -> &'static str;

    /// Execute against the backend's command set.
    fn run(&self, cmd: &mut dyn Commands, keys: &[String], args: &[i64]) -> StoreResult<Reply>;
}
