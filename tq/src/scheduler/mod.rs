//! Scheduler for task execution
//!
//! Manages task execution with priority queuing and a concurrency ceiling
//! in a single component.

mod config;
mod core;
mod queue;

pub use config::{AddOptions, DEFAULT_CONCURRENCY_LIMIT, SchedulerConfig};
pub use core::Scheduler;
pub use queue::{QueueEntry, QueueEntryStatus, QueueState, SchedulerStats};
