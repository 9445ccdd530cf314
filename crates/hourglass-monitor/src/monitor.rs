//! Queue monitor.

use std::sync::Arc;

use hourglass_queue::{DelayQueue, Event, EventListener, QueueConfig, QueueStats};
use hourglass_store::Store;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{MonitorError, MonitorResult};

/// Observes a queue through its collection sizes and report channel.
///
/// The queue's producers and consumers must have reporting enabled for
/// listeners to see anything.
pub struct QueueMonitor {
    queue: DelayQueue,
}

impl QueueMonitor {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn Store>,
        config: QueueConfig,
    ) -> MonitorResult<Self> {
        Ok(Self {
            queue: DelayQueue::new(name, store, config)?,
        })
    }

    pub fn name(&self) -> &str {
        self.queue.name()
    }

    pub async fn pending_count(&self) -> MonitorResult<u64> {
        Ok(self.queue.pending_count().await?)
    }

    pub async fn ready_count(&self) -> MonitorResult<u64> {
        Ok(self.queue.ready_count().await?)
    }

    pub async fn in_flight_count(&self) -> MonitorResult<u64> {
        Ok(self.queue.in_flight_count().await?)
    }

    /// All collection sizes. Each is read separately, so the result is
    /// advisory.
    pub async fn stats(&self) -> MonitorResult<QueueStats> {
        Ok(self.queue.stats().await?)
    }

    /// Forward every reported event to `listener` until the handle is closed.
    pub async fn listen(&self, listener: Arc<dyn EventListener>) -> MonitorResult<MonitorHandle> {
        let channel = self.queue.keys().report_channel.clone();
        let mut subscription = self
            .queue
            .store()
            .subscribe(&channel)
            .await
            .map_err(|source| MonitorError::Subscribe {
                channel: channel.clone(),
                source,
            })?;

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        info!("Monitoring '{}' on {}", self.queue.name(), channel);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    message = subscription.recv() => {
                        let Some(raw) = message else {
                            debug!("Report channel {} closed", channel);
                            break;
                        };
                        match Event::decode(&raw) {
                            Ok(event) => listener.on_event(&event).await,
                            Err(e) => warn!("Skipping undecodable event on {}: {}", channel, e),
                        }
                    }
                }
            }
        });

        Ok(MonitorHandle { cancel, task })
    }
}

/// Running monitor subscription.
pub struct MonitorHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Stop forwarding events.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the forwarding task to exit.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!("Monitor task ended abnormally: {}", e);
        }
    }
}
