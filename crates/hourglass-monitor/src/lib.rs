//! # Hourglass Monitor
//!
//! Observes a queue without consuming from it.
//!
//! ## Features
//!
//! - Point-in-time collection sizes
//! - Aggregate event counters fed from the queue's report channel
//! - Prometheus text exposition

pub mod counters;
pub mod error;
pub mod metrics;
pub mod monitor;

pub use counters::{CounterSnapshot, EventCounters};
pub use error::{MonitorError, MonitorResult};
pub use metrics::render_metrics;
pub use monitor::{MonitorHandle, QueueMonitor};
