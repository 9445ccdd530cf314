//! Atomic pipeline transitions.
//!
//! Each script runs as one indivisible step inside the backing store, so
//! concurrent consumers never observe a message between two collections.

use hourglass_store::{Commands, Reply, Script, StoreResult};

/// Upper bound on ids moved by one primitive call.
pub const BATCH_SIZE: usize = 4000;

/// Lowest score considered by sweeps.
const MIN_SCORE: i64 = i64::MIN;

/// pending → ready.
///
/// Keys: `[pending, ready]`. Args: `[now]`. Replies with the number moved.
pub struct PromoteDue;

impl Script for PromoteDue {
    fn name(&self) -> &'static str {
        "promote_due"
    }

    fn run(&self, cmd: &mut dyn Commands, keys: &[String], args: &[i64]) -> StoreResult<Reply> {
        let (pending, ready, now) = (&keys[0], &keys[1], args[0]);
        let due = cmd.zrange_by_score(pending, MIN_SCORE, now)?;
        if due.is_empty() {
            return Ok(Reply::Int(0));
        }
        for chunk in due.chunks(BATCH_SIZE) {
            cmd.lpush(ready, chunk)?;
        }
        cmd.zrem_range_by_score(pending, MIN_SCORE, now)?;
        Ok(Reply::Int(due.len() as i64))
    }
}

/// ready → in-flight, or retry → in-flight.
///
/// Keys: `[source, unack]`. Args: `[deadline]`. Replies with the claimed id or
/// `Nil` when the source is empty.
pub struct ClaimOne;

impl Script for ClaimOne {
    fn name(&self) -> &'static str {
        "claim_one"
    }

    fn run(&self, cmd: &mut dyn Commands, keys: &[String], args: &[i64]) -> StoreResult<Reply> {
        let (source, unack, deadline) = (&keys[0], &keys[1], args[0]);
        match cmd.rpop(source)? {
            Some(id) => {
                cmd.zadd(unack, &[(id.clone(), deadline)])?;
                Ok(Reply::Bulk(id))
            }
            None => Ok(Reply::Nil),
        }
    }
}

/// in-flight → retry or dead-letter, for every id whose deadline passed.
///
/// Keys: `[unack, retry_count, retry, garbage]`. Args: `[now]`. Replies with
/// `[retried, dead_lettered]`.
pub struct SweepUnacked;

impl Script for SweepUnacked {
    fn name(&self) -> &'static str {
        "sweep_unacked"
    }

    fn run(&self, cmd: &mut dyn Commands, keys: &[String], args: &[i64]) -> StoreResult<Reply> {
        let (unack, retry_count, retry, garbage) = (&keys[0], &keys[1], &keys[2], &keys[3]);
        let now = args[0];

        let expired = cmd.zrange_by_score(unack, MIN_SCORE, now)?;
        let (mut retried, mut dead) = (0i64, 0i64);

        for chunk in expired.chunks(BATCH_SIZE) {
            let budgets = cmd.hmget(retry_count, chunk)?;
            let mut to_retry = Vec::new();
            let mut to_bury = Vec::new();
            for (id, budget) in chunk.iter().zip(budgets) {
                // Missing or unparsable budgets count as exhausted.
                let remaining = budget.and_then(|b| b.parse::<i64>().ok()).unwrap_or(0);
                if remaining > 0 {
                    cmd.hincr_by(retry_count, id, -1)?;
                    to_retry.push(id.clone());
                } else {
                    to_bury.push(id.clone());
                }
            }
            if !to_retry.is_empty() {
                cmd.lpush(retry, &to_retry)?;
                retried += to_retry.len() as i64;
            }
            if !to_bury.is_empty() {
                cmd.hdel(retry_count, &to_bury)?;
                cmd.sadd(garbage, &to_bury)?;
                dead += to_bury.len() as i64;
            }
        }

        if !expired.is_empty() {
            cmd.zrem_range_by_score(unack, MIN_SCORE, now)?;
        }
        Ok(Reply::Array(vec![Reply::Int(retried), Reply::Int(dead)]))
    }
}

/// Move an in-flight id's deadline. Ids no longer in-flight are left alone.
///
/// Keys: `[unack]`. Args: `[score]`. Replies `1` if rescheduled, else `0`.
pub struct Reschedule {
    pub member: String,
}

impl Script for Reschedule {
    fn name(&self) -> &'static str {
        "reschedule"
    }

    fn run(&self, cmd: &mut dyn Commands, keys: &[String], args: &[i64]) -> StoreResult<Reply> {
        let unack = &keys[0];
        if cmd.zscore(unack, &self.member)?.is_none() {
            return Ok(Reply::Int(0));
        }
        cmd.zadd(unack, &[(self.member.clone(), args[0])])?;
        Ok(Reply::Int(1))
    }
}
