//! Domain types for the task queue
//!
//! A `Task` is passive data: a category label, optional identity, a priority
//! rank, an async action and its lifecycle hooks.

mod priority;
mod task;

pub use priority::Priority;
pub use task::Task;

pub(crate) use task::{Job, Settlement, panic_message};
