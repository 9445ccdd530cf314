//! Aggregate event counters.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use hourglass_queue::{Event, EventKind, EventListener};
use serde::{Deserialize, Serialize};

/// Running totals per event kind.
#[derive(Debug, Default)]
pub struct EventCounters {
    produced: AtomicU64,
    ready: AtomicU64,
    delivered: AtomicU64,
    acked: AtomicU64,
    nacked: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
}

/// Counter values at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub produced: u64,
    pub ready: u64,
    pub delivered: u64,
    pub acked: u64,
    pub nacked: u64,
    pub retried: u64,
    pub dead_lettered: u64,
}

impl CounterSnapshot {
    pub fn get(&self, kind: EventKind) -> u64 {
        match kind {
            EventKind::Produced => self.produced,
            EventKind::Ready => self.ready,
            EventKind::Delivered => self.delivered,
            EventKind::Acked => self.acked,
            EventKind::Nacked => self.nacked,
            EventKind::Retried => self.retried,
            EventKind::DeadLettered => self.dead_lettered,
        }
    }
}

impl EventCounters {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, kind: EventKind) -> &AtomicU64 {
        match kind {
            EventKind::Produced => &self.produced,
            EventKind::Ready => &self.ready,
            EventKind::Delivered => &self.delivered,
            EventKind::Acked => &self.acked,
            EventKind::Nacked => &self.nacked,
            EventKind::Retried => &self.retried,
            EventKind::DeadLettered => &self.dead_lettered,
        }
    }

    /// Add `count` to the total for `kind`.
    pub fn add(&self, kind: EventKind, count: u64) {
        self.counter(kind).fetch_add(count, Ordering::SeqCst);
    }

    pub fn get(&self, kind: EventKind) -> u64 {
        self.counter(kind).load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            produced: self.get(EventKind::Produced),
            ready: self.get(EventKind::Ready),
            delivered: self.get(EventKind::Delivered),
            acked: self.get(EventKind::Acked),
            nacked: self.get(EventKind::Nacked),
            retried: self.get(EventKind::Retried),
            dead_lettered: self.get(EventKind::DeadLettered),
        }
    }
}

#[async_trait]
impl EventListener for EventCounters {
    async fn on_event(&self, event: &Event) {
        self.add(event.kind, event.count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_counts_accumulate() {
        let counters = EventCounters::new();
        counters
            .on_event(&Event::new(EventKind::Ready, Utc::now(), 40))
            .await;
        counters
            .on_event(&Event::new(EventKind::Ready, Utc::now(), 2))
            .await;
        counters
            .on_event(&Event::new(EventKind::Acked, Utc::now(), 1))
            .await;

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.ready, 42);
        assert_eq!(snapshot.acked, 1);
        assert_eq!(snapshot.get(EventKind::DeadLettered), 0);
    }

    #[test]
    fn test_snapshot_matches_get() {
        let counters = EventCounters::new();
        for (i, kind) in EventKind::ALL.iter().enumerate() {
            counters.add(*kind, i as u64 + 1);
        }
        let snapshot = counters.snapshot();
        for kind in EventKind::ALL {
            assert_eq!(snapshot.get(kind), counters.get(kind));
        }
    }
}
