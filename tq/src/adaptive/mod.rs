//! Adaptive concurrency control
//!
//! Wraps a [`Scheduler`](crate::scheduler::Scheduler) and retunes its
//! concurrency ceiling from the observed submission rate:
//!
//! - [`RateTracker`] keeps submission timestamps for a trailing window
//! - [`Throttle`] spaces recomputations at least `recalc_debounce_ms` apart
//! - [`StepTable`] maps submissions-per-second to a ceiling

mod config;
mod core;
mod rate;
mod steps;
mod throttle;

pub use config::{AdaptiveConfig, DEFAULT_INITIAL_CONCURRENCY};
pub use core::AdaptiveScheduler;
pub use rate::RateTracker;
pub use steps::{ConcurrencyStep, StepTable};
pub use throttle::{Gate, Throttle};
