//! Timer-driven consumer.

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod tests;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{QueueError, QueueResult};
use crate::handler::MessageHandler;
use crate::message::MessageId;
use crate::queue::{DelayQueue, DeliveryOutcome};

/// Lifecycle of a [`Consumer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Running,
    /// Terminal.
    Stopped,
}

/// Tally of one consume cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub promoted: u64,
    pub claimed: u64,
    pub claimed_retries: u64,
    pub acked: u64,
    pub nacked: u64,
    pub missing: u64,
    pub failed: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub collected: u64,
    /// Phases that failed. Later phases still ran.
    pub errors: Vec<QueueError>,
}

impl CycleReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Whether the cycle moved any message.
    pub fn is_idle(&self) -> bool {
        self.promoted == 0
            && self.claimed == 0
            && self.claimed_retries == 0
            && self.retried == 0
            && self.dead_lettered == 0
            && self.collected == 0
    }

    fn record(&mut self, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Acked => self.acked += 1,
            DeliveryOutcome::Nacked => self.nacked += 1,
            DeliveryOutcome::Missing => self.missing += 1,
            DeliveryOutcome::Failed => self.failed += 1,
        }
    }

    fn phase<T>(&mut self, phase: &str, result: QueueResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                error!("Consume phase '{}' failed: {}", phase, e);
                self.errors.push(e);
                None
            }
        }
    }
}

#[derive(Clone, Copy)]
enum Source {
    Ready,
    Retry,
}

/// Drives a [`DelayQueue`]: on every tick it promotes due messages, claims and
/// delivers them, sweeps expired claims and collects dead letters.
pub struct Consumer {
    queue: Arc<DelayQueue>,
    handler: Option<Arc<dyn MessageHandler>>,
    state: Arc<Mutex<ConsumerState>>,
    cancel: CancellationToken,
}

impl Consumer {
    pub fn new(queue: Arc<DelayQueue>) -> Self {
        Self {
            queue,
            handler: None,
            state: Arc::new(Mutex::new(ConsumerState::Idle)),
            cancel: CancellationToken::new(),
        }
    }

    /// Register the message handler.
    pub fn with_handler(mut self, handler: impl MessageHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn queue(&self) -> &Arc<DelayQueue> {
        &self.queue
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.lock()
    }

    /// Run one consume cycle now.
    pub async fn consume(&self) -> QueueResult<CycleReport> {
        let handler = self.handler.clone().ok_or(QueueError::MissingHandler)?;
        Ok(run_cycle(&self.queue, &handler).await)
    }

    /// Spawn the ticker loop.
    pub fn start(&self) -> QueueResult<JoinHandle<()>> {
        let handler = self.handler.clone().ok_or(QueueError::MissingHandler)?;
        {
            let mut state = self.state.lock();
            if self.cancel.is_cancelled() {
                return Err(QueueError::Stopped);
            }
            match *state {
                ConsumerState::Running => return Err(QueueError::AlreadyRunning),
                ConsumerState::Stopped => return Err(QueueError::Stopped),
                ConsumerState::Idle => *state = ConsumerState::Running,
            }
        }

        let queue = self.queue.clone();
        let state = self.state.clone();
        let cancel = self.cancel.clone();
        let interval = queue.config().fetch_interval();
        info!(
            "Consumer for '{}' started (interval: {:?}, concurrency: {})",
            queue.name(),
            interval,
            queue.config().concurrency
        );

        Ok(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = run_cycle(&queue, &handler).await;
                        if !report.is_idle() {
                            debug!("Cycle on '{}': {:?}", queue.name(), report);
                        }
                    }
                }
            }

            *state.lock() = ConsumerState::Stopped;
            info!("Consumer for '{}' stopped", queue.name());
        }))
    }

    /// Ask the loop to exit after its current cycle. A running consumer
    /// reports `Stopped` only once its loop has exited.
    pub fn stop(&self) {
        {
            let mut state = self.state.lock();
            if *state == ConsumerState::Idle {
                *state = ConsumerState::Stopped;
            }
        }
        self.cancel.cancel();
    }
}

async fn run_cycle(queue: &Arc<DelayQueue>, handler: &Arc<dyn MessageHandler>) -> CycleReport {
    let mut report = CycleReport::default();

    if let Some(moved) = report.phase("promote", queue.promote_due().await) {
        report.promoted = moved;
    }

    let ids = drain(queue, Source::Ready, &mut report).await;
    report.claimed = ids.len() as u64;
    dispatch(queue, handler, ids, &mut report).await;

    if let Some(outcome) = report.phase("sweep", queue.sweep_unacked().await) {
        report.retried = outcome.retried;
        report.dead_lettered = outcome.dead_lettered;
    }
    if let Some(collected) = report.phase("collect_garbage", queue.collect_garbage().await) {
        report.collected = collected;
    }

    let ids = drain(queue, Source::Retry, &mut report).await;
    report.claimed_retries = ids.len() as u64;
    dispatch(queue, handler, ids, &mut report).await;

    report
}

/// Claim from `source` until it is empty or the fetch limit is reached.
async fn drain(queue: &DelayQueue, source: Source, report: &mut CycleReport) -> Vec<MessageId> {
    let limit = queue.config().fetch_limit as usize;
    let mut ids = Vec::new();
    while limit == 0 || ids.len() < limit {
        let claimed = match source {
            Source::Ready => queue.claim_ready().await,
            Source::Retry => queue.claim_retry().await,
        };
        match report.phase("claim", claimed) {
            Some(Some(id)) => ids.push(id),
            _ => break,
        }
    }
    ids
}

/// Deliver every id, returning only once all deliveries have finished.
async fn dispatch(
    queue: &Arc<DelayQueue>,
    handler: &Arc<dyn MessageHandler>,
    ids: Vec<MessageId>,
    report: &mut CycleReport,
) {
    let concurrency = queue.config().concurrency as usize;
    if concurrency <= 1 || ids.len() <= 1 {
        for id in ids {
            let outcome = queue.deliver(&id, handler.as_ref()).await;
            settle(report, outcome);
        }
        return;
    }

    let permits = Arc::new(Semaphore::new(concurrency));
    let mut tasks = JoinSet::new();
    for id in ids {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let queue = queue.clone();
        let handler = handler.clone();
        tasks.spawn(async move {
            let outcome = queue.deliver(&id, handler.as_ref()).await;
            drop(permit);
            outcome
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => settle(report, outcome),
            Err(e) => {
                error!("Delivery task panicked: {}", e);
                report.failed += 1;
            }
        }
    }
}

fn settle(report: &mut CycleReport, outcome: QueueResult<DeliveryOutcome>) {
    match outcome {
        Ok(outcome) => report.record(outcome),
        Err(e) => {
            error!("Delivery failed: {}", e);
            report.failed += 1;
            report.errors.push(e);
        }
    }
}
