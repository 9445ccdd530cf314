//! # Hourglass Queue
//!
//! Delayed message queue over a shared [`hourglass_store::Store`].
//!
//! ## Features
//!
//! - Scheduled delivery (`send_at` / `send_after`)
//! - Five-stage pipeline: pending, ready, in-flight, retry, dead-letter
//! - Atomic stage transitions safe under many concurrent consumers
//! - Bounded retry budget per message, at-least-once delivery
//! - Timer-driven [`Consumer`] with bounded handler concurrency
//! - Lifecycle events for out-of-process monitoring

pub mod config;
pub mod consumer;
pub mod error;
pub mod events;
pub mod handler;
pub mod keys;
pub mod message;
pub mod publisher;
pub mod queue;
pub mod scripts;

pub use config::QueueConfig;
pub use consumer::{Consumer, ConsumerState, CycleReport};
pub use error::{QueueError, QueueResult};
pub use events::{Event, EventKind, EventListener, PubSubReporter};
pub use handler::{handler_fn, FnHandler, MessageHandler};
pub use keys::QueueKeys;
pub use message::{MessageId, SendOptions};
pub use publisher::Publisher;
pub use queue::{DelayQueue, DeliveryOutcome, QueueStats, SweepOutcome};
