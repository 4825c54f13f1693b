//! taskqueue - priority-ordered, concurrency-bounded async task queue
//!
//! Tasks are opaque async actions with optional lifecycle hooks. A
//! [`Scheduler`] serves pending tasks by ascending priority rank (ties in
//! submission order) while keeping at most `concurrency_limit` of them
//! running. An [`AdaptiveScheduler`] wraps a scheduler and retunes that
//! ceiling from the observed submission rate.
//!
//! # Lifecycle
//!
//! Pending → Running → Settled (`on_resolve` xor `on_reject`) → Done
//! (`on_done`, slot released). Action errors and panics never escape the
//! scheduler; they reach `on_reject` or are absorbed.
//!
//! # Modules
//!
//! - [`domain`] - Task records and priority ranks
//! - [`scheduler`] - Base queue: priority store, bounded in-flight set
//! - [`adaptive`] - Rate tracker, throttle gate and step-table controller
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface for the `tq` load generator

pub mod adaptive;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod scheduler;

// Re-export commonly used types
pub use adaptive::{AdaptiveConfig, AdaptiveScheduler, StepTable};
pub use config::{Config, QueueMode};
pub use domain::{Priority, Task};
pub use error::QueueError;
pub use scheduler::{AddOptions, QueueEntry, QueueEntryStatus, QueueState, Scheduler, SchedulerConfig, SchedulerStats};
