//! # Hourglass Store
//!
//! Storage capability for the Hourglass delayed message queue.
//!
//! ## Features
//!
//! - Scalars with expiry, hashes, sets, sorted sets and lists
//! - Atomic multi-key scripts ([`Script`]) executed by the backend
//! - Publish/subscribe broadcast channels
//! - In-process ([`MemoryStore`]) and SQLite ([`SqliteStore`]) backends
//!
//! The queue engine only talks to the [`Store`] trait, so any backend that
//! honours the same contract can carry a queue.

pub mod clock;
pub mod command;
pub mod error;
pub mod memory;
pub mod pubsub;
mod schema;
pub mod sqlite;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{Command, Commands, Reply, Script};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use pubsub::{PubSubBus, Subscription};
pub use sqlite::SqliteStore;
pub use store::{Store, StoreExt};
