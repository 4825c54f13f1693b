//! Scheduler configuration

use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Default concurrency ceiling for a plain scheduler
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 10;

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SchedulerConfig {
    /// Start a scheduling pass on every addition
    #[serde(default = "default_auto_run")]
    pub auto_run: bool,

    /// Max simultaneously running tasks
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
}

fn default_auto_run() -> bool {
    true
}

fn default_concurrency_limit() -> usize {
    DEFAULT_CONCURRENCY_LIMIT
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            auto_run: true,
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
        }
    }
}

impl SchedulerConfig {
    /// Reject out-of-range values before a scheduler is built
    pub fn validate(&self) -> Result<(), QueueError> {
        validate_concurrency_limit(self.concurrency_limit)
    }
}

pub(crate) fn validate_concurrency_limit(limit: usize) -> Result<(), QueueError> {
    if limit == 0 {
        return Err(QueueError::invalid_config("concurrency-limit", limit, "must be positive"));
    }
    Ok(())
}

/// Per-call options for `add_task_with` / `bulk_add_tasks_with`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddOptions {
    /// Overrides the queue-level `auto_run` when set
    pub auto_run: Option<bool>,
}

impl AddOptions {
    /// Options that leave scheduling to a later `run()`
    pub fn deferred() -> Self {
        Self { auto_run: Some(false) }
    }

    /// Options that force a scheduling pass
    pub fn immediate() -> Self {
        Self { auto_run: Some(true) }
    }

    pub(crate) fn auto_run_or(&self, default: bool) -> bool {
        self.auto_run.unwrap_or(default)
    }
}
