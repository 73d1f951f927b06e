//! `queue` crate: priority dispatch queue with per-owner concurrency fairness.
//!
//! [`FairQueue`] decides which pending unit of work starts next: highest
//! priority first, FIFO within a priority, skipping owners that already have
//! `max_concurrent_per_owner` items running. [`QueuedDispatcher`] wraps any
//! [`dispatch::WorkDispatcher`] with that policy so the engine can consume it
//! without knowing a queue exists.

pub mod fair;
pub mod dispatcher;

pub use dispatcher::QueuedDispatcher;
pub use fair::{FairQueue, QueueItem, QueueStats, DEFAULT_OWNER};
