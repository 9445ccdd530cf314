//! The queue engine.

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hourglass_store::{Clock, Reply, Script, Store, StoreExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::events::{Event, EventKind, EventListener, PubSubReporter};
use crate::handler::MessageHandler;
use crate::keys::QueueKeys;
use crate::message::{MessageId, SendOptions};
use crate::scripts::{ClaimOne, PromoteDue, Reschedule, SweepUnacked};

/// Result of sweeping expired in-flight messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub retried: u64,
    pub dead_lettered: u64,
}

/// What happened to a message handed to [`DelayQueue::deliver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Handler confirmed; the message is gone.
    Acked,
    /// Handler declined; the message waits for the next sweep.
    Nacked,
    /// Payload already expired or removed; the handler was not called.
    Missing,
    /// Handler errored; the message stays in-flight until its deadline.
    Failed,
}

/// Collection sizes at one point in time. Not an atomic snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub ready: u64,
    pub in_flight: u64,
    pub retry: u64,
    pub dead_letter: u64,
    /// Messages holding a retry budget, i.e. not yet acked or dead-lettered.
    pub outstanding: u64,
}

/// Delayed message queue over a shared [`Store`].
///
/// Holds no authoritative state of its own: any number of instances, in any
/// number of processes, may operate on the same queue name.
pub struct DelayQueue {
    name: String,
    config: QueueConfig,
    keys: QueueKeys,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    listener: RwLock<Option<Arc<dyn EventListener>>>,
    promote_due: Arc<dyn Script>,
    claim_one: Arc<dyn Script>,
    sweep_unacked: Arc<dyn Script>,
}

impl DelayQueue {
    /// Create a queue named `name` on `store`.
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn Store>,
        config: QueueConfig,
    ) -> QueueResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(QueueError::InvalidConfig(
                "queue name must not be empty".to_string(),
            ));
        }
        config.validate()?;

        let keys = QueueKeys::new(&name, config.hash_tag_keys);
        let clock = store.clock();
        debug!("Created queue '{}' on {} store", name, store.id());

        Ok(Self {
            name,
            config,
            keys,
            store,
            clock,
            listener: RwLock::new(None),
            promote_due: Arc::new(PromoteDue),
            claim_one: Arc::new(ClaimOne),
            sweep_unacked: Arc::new(SweepUnacked),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn keys(&self) -> &QueueKeys {
        &self.keys
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Enqueue a payload for delivery at `deliver_at`.
    pub async fn send_at(
        &self,
        payload: &str,
        deliver_at: DateTime<Utc>,
        opts: SendOptions,
    ) -> QueueResult<MessageId> {
        let id = MessageId::generate();
        let now = self.clock.now();
        let retry_count = opts.retry_count.unwrap_or(self.config.default_retry_count);
        let ttl = opts.ttl.unwrap_or_else(|| self.config.message_ttl());
        let until_delivery = (deliver_at - now).to_std().unwrap_or(Duration::ZERO);

        self.store
            .set_ex(&self.keys.message(id.as_str()), payload, until_delivery + ttl)
            .await
            .map_err(QueueError::store("send"))?;
        self.store
            .hset(&self.keys.retry_count, id.as_str(), &retry_count.to_string())
            .await
            .map_err(QueueError::store("send"))?;
        self.store
            .zadd(&self.keys.pending, id.as_str(), deliver_at.timestamp_millis())
            .await
            .map_err(QueueError::store("send"))?;

        debug!(
            "Queued message {} on '{}' for {} (retries: {})",
            id, self.name, deliver_at, retry_count
        );
        self.emit(EventKind::Produced, 1).await;
        Ok(id)
    }

    /// Enqueue a payload for delivery after `delay`.
    pub async fn send_after(
        &self,
        payload: &str,
        delay: Duration,
        opts: SendOptions,
    ) -> QueueResult<MessageId> {
        let delay = chrono::Duration::milliseconds(delay.as_millis() as i64);
        self.send_at(payload, self.clock.now() + delay, opts).await
    }

    /// Move every pending message whose delivery time has come to ready.
    pub async fn promote_due(&self) -> QueueResult<u64> {
        let keys = vec![self.keys.pending.clone(), self.keys.ready.clone()];
        let reply = self
            .store
            .eval(self.promote_due.clone(), keys, vec![self.clock.now_millis()])
            .await
            .map_err(QueueError::store("promote_due"))?;
        let moved = count_reply(self.promote_due.name(), reply)?;
        if moved > 0 {
            debug!("Promoted {} messages to ready on '{}'", moved, self.name);
            self.emit(EventKind::Ready, moved).await;
        }
        Ok(moved)
    }

    /// Claim one ready message. `None` when nothing is ready.
    pub async fn claim_ready(&self) -> QueueResult<Option<MessageId>> {
        self.claim_from(self.keys.ready.clone()).await
    }

    /// Claim one message awaiting retry. `None` when nothing is waiting.
    pub async fn claim_retry(&self) -> QueueResult<Option<MessageId>> {
        self.claim_from(self.keys.retry.clone()).await
    }

    async fn claim_from(&self, source: String) -> QueueResult<Option<MessageId>> {
        let deadline = self.clock.now_millis() + self.config.max_consume_duration_ms as i64;
        let keys = vec![source, self.keys.unack.clone()];
        let reply = self
            .store
            .eval(self.claim_one.clone(), keys, vec![deadline])
            .await
            .map_err(QueueError::store("claim"))?;
        match reply {
            Reply::Nil => Ok(None),
            Reply::Bulk(id) => {
                self.emit(EventKind::Delivered, 1).await;
                Ok(Some(MessageId::from(id)))
            }
            other => Err(QueueError::UnexpectedReply {
                script: self.claim_one.name(),
                reply: other,
            }),
        }
    }

    /// Acknowledge a message. Returns `false` if it was not in-flight.
    pub async fn ack(&self, id: &MessageId) -> QueueResult<bool> {
        let removed = self
            .store
            .zrem(&self.keys.unack, id.as_str())
            .await
            .map_err(QueueError::store("ack"))?;

        // The payload may already have expired.
        if let Err(e) = self.store.del(&[self.keys.message(id.as_str())]).await {
            warn!("Failed to delete payload of {}: {}", id, e);
        }
        if let Err(e) = self
            .store
            .hdel(&self.keys.retry_count, &[id.to_string()])
            .await
        {
            warn!("Failed to delete retry budget of {}: {}", id, e);
        }

        if removed == 0 {
            debug!("Ack for {} on '{}' found nothing in-flight", id, self.name);
            return Ok(false);
        }
        self.emit(EventKind::Acked, 1).await;
        Ok(true)
    }

    /// Negatively acknowledge a message: its deadline becomes now, so the next
    /// sweep retries or dead-letters it. Returns `false` if it was not
    /// in-flight.
    pub async fn nack(&self, id: &MessageId) -> QueueResult<bool> {
        let script: Arc<dyn Script> = Arc::new(Reschedule {
            member: id.to_string(),
        });
        let reply = self
            .store
            .eval(script.clone(), vec![self.keys.unack.clone()], vec![self.clock.now_millis()])
            .await
            .map_err(QueueError::store("nack"))?;
        if count_reply(script.name(), reply)? == 0 {
            debug!("Nack for {} on '{}' found nothing in-flight", id, self.name);
            return Ok(false);
        }
        self.emit(EventKind::Nacked, 1).await;
        Ok(true)
    }

    /// Move every in-flight message past its deadline to retry, or to
    /// dead-letter once its retry budget is spent.
    pub async fn sweep_unacked(&self) -> QueueResult<SweepOutcome> {
        let keys = vec![
            self.keys.unack.clone(),
            self.keys.retry_count.clone(),
            self.keys.retry.clone(),
            self.keys.garbage.clone(),
        ];
        let reply = self
            .store
            .eval(self.sweep_unacked.clone(), keys, vec![self.clock.now_millis()])
            .await
            .map_err(QueueError::store("sweep_unacked"))?;

        let counts = match &reply {
            Reply::Array(items) => (
                items.first().and_then(Reply::as_count),
                items.get(1).and_then(Reply::as_count),
            ),
            _ => (None, None),
        };
        let outcome = match counts {
            (Some(retried), Some(dead_lettered)) => SweepOutcome {
                retried,
                dead_lettered,
            },
            _ => {
                return Err(QueueError::UnexpectedReply {
                    script: self.sweep_unacked.name(),
                    reply,
                });
            }
        };

        if outcome.retried > 0 {
            self.emit(EventKind::Retried, outcome.retried).await;
        }
        if outcome.dead_lettered > 0 {
            info!(
                "{} messages on '{}' exhausted their retries",
                outcome.dead_lettered, self.name
            );
            self.emit(EventKind::DeadLettered, outcome.dead_lettered).await;
        }
        Ok(outcome)
    }

    /// Delete the payloads of dead-lettered messages and forget them.
    pub async fn collect_garbage(&self) -> QueueResult<u64> {
        let dead = self
            .store
            .smembers(&self.keys.garbage)
            .await
            .map_err(QueueError::store("collect_garbage"))?;
        if dead.is_empty() {
            return Ok(0);
        }

        let payload_keys: Vec<String> = dead.iter().map(|id| self.keys.message(id)).collect();
        self.store
            .del(&payload_keys)
            .await
            .map_err(QueueError::store("collect_garbage"))?;
        let removed = self
            .store
            .srem(&self.keys.garbage, &dead)
            .await
            .map_err(QueueError::store("collect_garbage"))?;

        debug!("Collected {} dead messages on '{}'", removed, self.name);
        Ok(removed)
    }

    /// Hand a claimed message to `handler` and settle it by the result.
    pub async fn deliver(
        &self,
        id: &MessageId,
        handler: &dyn MessageHandler,
    ) -> QueueResult<DeliveryOutcome> {
        let payload = self
            .store
            .get(&self.keys.message(id.as_str()))
            .await
            .map_err(QueueError::store("deliver"))?;
        let Some(payload) = payload else {
            debug!("Payload of {} on '{}' is gone, skipping", id, self.name);
            return Ok(DeliveryOutcome::Missing);
        };

        match handler.handle(&payload).await {
            Ok(true) => {
                self.ack(id).await?;
                Ok(DeliveryOutcome::Acked)
            }
            Ok(false) => {
                self.nack(id).await?;
                Ok(DeliveryOutcome::Nacked)
            }
            Err(e) => {
                error!("Handler failed for {} on '{}': {:#}", id, self.name, e);
                Ok(DeliveryOutcome::Failed)
            }
        }
    }

    pub async fn pending_count(&self) -> QueueResult<u64> {
        self.store
            .zcard(&self.keys.pending)
            .await
            .map_err(QueueError::store("pending_count"))
    }

    pub async fn ready_count(&self) -> QueueResult<u64> {
        self.store
            .llen(&self.keys.ready)
            .await
            .map_err(QueueError::store("ready_count"))
    }

    pub async fn in_flight_count(&self) -> QueueResult<u64> {
        self.store
            .zcard(&self.keys.unack)
            .await
            .map_err(QueueError::store("in_flight_count"))
    }

    pub async fn retry_count(&self) -> QueueResult<u64> {
        self.store
            .llen(&self.keys.retry)
            .await
            .map_err(QueueError::store("retry_count"))
    }

    pub async fn dead_letter_count(&self) -> QueueResult<u64> {
        self.store
            .scard(&self.keys.garbage)
            .await
            .map_err(QueueError::store("dead_letter_count"))
    }

    /// Number of messages still holding a retry budget.
    pub async fn outstanding_count(&self) -> QueueResult<u64> {
        self.store
            .hlen(&self.keys.retry_count)
            .await
            .map_err(QueueError::store("outstanding_count"))
    }

    /// Read every collection size.
    pub async fn stats(&self) -> QueueResult<QueueStats> {
        Ok(QueueStats {
            pending: self.pending_count().await?,
            ready: self.ready_count().await?,
            in_flight: self.in_flight_count().await?,
            retry: self.retry_count().await?,
            dead_letter: self.dead_letter_count().await?,
            outstanding: self.outstanding_count().await?,
        })
    }

    /// Register the event listener, replacing any previous one.
    pub fn listen(&self, listener: Arc<dyn EventListener>) {
        *self.listener.write() = Some(listener);
    }

    /// Remove the event listener.
    pub fn disable_listener(&self) {
        *self.listener.write() = None;
    }

    /// Broadcast events on the queue's report channel for monitors.
    pub fn enable_report(&self) {
        let reporter = PubSubReporter::new(self.store.clone(), self.keys.report_channel.clone());
        self.listen(Arc::new(reporter));
        info!(
            "Reporting events for '{}' on {}",
            self.name, self.keys.report_channel
        );
    }

    /// Stop broadcasting events.
    pub fn disable_report(&self) {
        self.disable_listener();
    }

    async fn emit(&self, kind: EventKind, count: u64) {
        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            listener
                .on_event(&Event::new(kind, self.clock.now(), count))
                .await;
        }
    }
}

fn count_reply(script: &'static str, reply: Reply) -> QueueResult<u64> {
    match reply.as_count() {
        Some(n) => Ok(n),
        None => Err(QueueError::UnexpectedReply { script, reply }),
    }
}
