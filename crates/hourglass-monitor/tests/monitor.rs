//! Monitor fed by a reporting queue.

use std::sync::Arc;
use std::time::Duration;

use hourglass_monitor::{render_metrics, EventCounters, QueueMonitor};
use hourglass_queue::{
    handler_fn, Consumer, DelayQueue, EventKind, Publisher, QueueConfig, SendOptions,
};
use hourglass_store::{MemoryStore, SqliteStore, Store};
use tempfile::TempDir;

async fn wait_for(counters: &EventCounters, kind: EventKind, expected: u64) {
    for _ in 0..500 {
        if counters.get(kind) >= expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(counters.get(kind), expected, "{} total", kind);
}

#[tokio::test]
async fn monitor_reconstructs_totals() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let monitor = QueueMonitor::new("watched", store.clone(), QueueConfig::default()).unwrap();
    let counters = Arc::new(EventCounters::new());
    let handle = monitor.listen(counters.clone()).await.unwrap();

    let publisher = Publisher::new("watched", store.clone(), QueueConfig::default()).unwrap();
    publisher.enable_report();
    for i in 0..100 {
        let opts = if i % 2 == 0 {
            SendOptions::default()
        } else {
            SendOptions::new().with_retry_count(0)
        };
        publisher
            .send_after(&i.to_string(), Duration::ZERO, opts)
            .await
            .unwrap();
    }

    let queue = Arc::new(DelayQueue::new("watched", store.clone(), QueueConfig::default()).unwrap());
    queue.enable_report();
    // Even payloads succeed, odd ones are declined once and dead-lettered.
    let consumer = Consumer::new(queue.clone()).with_handler(handler_fn(|payload: String| async move {
        let n: u32 = payload.parse().unwrap_or(1);
        Ok::<_, anyhow::Error>(n % 2 == 0)
    }));
    consumer.consume().await.unwrap();
    consumer.consume().await.unwrap();

    wait_for(&counters, EventKind::Produced, 100).await;
    wait_for(&counters, EventKind::Ready, 100).await;
    wait_for(&counters, EventKind::Delivered, 100).await;
    wait_for(&counters, EventKind::Acked, 50).await;
    wait_for(&counters, EventKind::Nacked, 50).await;
    wait_for(&counters, EventKind::DeadLettered, 50).await;
    assert_eq!(counters.get(EventKind::Retried), 0);

    let stats = monitor.stats().await.unwrap();
    assert_eq!(stats, Default::default());

    let text = render_metrics(monitor.name(), &counters.snapshot(), &stats);
    assert!(text.contains("hourglass_acked_total{queue=\"watched\"} 50"));

    handle.close();
    handle.join().await;
}

#[tokio::test]
async fn monitor_reports_collection_sizes() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let queue = DelayQueue::new("sizes", store.clone(), QueueConfig::default()).unwrap();
    let monitor = QueueMonitor::new("sizes", store, QueueConfig::default()).unwrap();

    queue
        .send_after("later", Duration::from_secs(3600), SendOptions::default())
        .await
        .unwrap();
    for _ in 0..3 {
        queue
            .send_after("now", Duration::ZERO, SendOptions::default())
            .await
            .unwrap();
    }
    queue.promote_due().await.unwrap();
    queue.claim_ready().await.unwrap();

    assert_eq!(monitor.pending_count().await.unwrap(), 1);
    assert_eq!(monitor.ready_count().await.unwrap(), 2);
    assert_eq!(monitor.in_flight_count().await.unwrap(), 1);
}

#[tokio::test]
async fn undecodable_reports_are_skipped() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let monitor = QueueMonitor::new("noisy", store.clone(), QueueConfig::default()).unwrap();
    let counters = Arc::new(EventCounters::new());
    let handle = monitor.listen(counters.clone()).await.unwrap();

    store.publish("dq:noisy:reportEvents", "garbage").await.unwrap();
    let queue = DelayQueue::new("noisy", store.clone(), QueueConfig::default()).unwrap();
    queue.enable_report();
    queue
        .send_after("x", Duration::ZERO, SendOptions::default())
        .await
        .unwrap();

    wait_for(&counters, EventKind::Produced, 1).await;
    handle.close();
    handle.join().await;
}

#[tokio::test]
async fn closed_handle_stops_forwarding() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let monitor = QueueMonitor::new("closing", store.clone(), QueueConfig::default()).unwrap();
    let counters = Arc::new(EventCounters::new());
    let handle = monitor.listen(counters.clone()).await.unwrap();

    handle.close();
    for _ in 0..100 {
        if handle.is_closed() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(handle.is_closed());
    handle.join().await;

    let queue = DelayQueue::new("closing", store, QueueConfig::default()).unwrap();
    queue.enable_report();
    queue
        .send_after("x", Duration::ZERO, SendOptions::default())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(counters.get(EventKind::Produced), 0);
}

#[tokio::test]
async fn monitor_on_another_connection_sees_events() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("queue.db");
    let producer_store: Arc<dyn Store> = Arc::new(SqliteStore::open(&path).await.unwrap());
    let monitor_store: Arc<dyn Store> = Arc::new(SqliteStore::open(&path).await.unwrap());

    let monitor = QueueMonitor::new("shared", monitor_store, QueueConfig::default()).unwrap();
    let counters = Arc::new(EventCounters::new());
    let handle = monitor.listen(counters.clone()).await.unwrap();

    let publisher = Publisher::new("shared", producer_store, QueueConfig::default()).unwrap();
    publisher.enable_report();
    for i in 0..5 {
        publisher
            .send_after(&i.to_string(), Duration::ZERO, SendOptions::default())
            .await
            .unwrap();
    }

    assert_eq!(monitor.pending_count().await.unwrap(), 5);
    wait_for(&counters, EventKind::Produced, 5).await;

    handle.close();
    handle.join().await;
}
