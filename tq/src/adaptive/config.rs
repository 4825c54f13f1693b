//! Adaptive controller configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::QueueError;
use crate::scheduler::SchedulerConfig;

use super::steps::StepTable;

/// Seed ceiling applied once at construction, before any recomputation
pub const DEFAULT_INITIAL_CONCURRENCY: usize = 50;

/// Adaptive controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AdaptiveConfig {
    /// Start a scheduling pass on every addition
    #[serde(default = "default_auto_run")]
    pub auto_run: bool,

    /// Trailing window for the submission rate, in milliseconds
    #[serde(default = "default_window_duration_ms")]
    pub window_duration_ms: u64,

    /// Minimum spacing between concurrency recomputations, in milliseconds
    #[serde(default = "default_recalc_debounce_ms")]
    pub recalc_debounce_ms: u64,

    /// Seed concurrency ceiling
    #[serde(default = "default_initial_concurrency")]
    pub initial_concurrency: usize,

    /// Hard cap on retained submission timestamps
    #[serde(default = "default_max_rate_samples")]
    pub max_rate_samples: usize,

    /// Rate to ceiling mapping
    #[serde(default)]
    pub steps: StepTable,
}

fn default_auto_run() -> bool {
    true
}

fn default_window_duration_ms() -> u64 {
    1000
}

fn default_recalc_debounce_ms() -> u64 {
    100
}

fn default_initial_concurrency() -> usize {
    DEFAULT_INITIAL_CONCURRENCY
}

fn default_max_rate_samples() -> usize {
    100_000
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            auto_run: default_auto_run(),
            window_duration_ms: default_window_duration_ms(),
            recalc_debounce_ms: default_recalc_debounce_ms(),
            initial_concurrency: default_initial_concurrency(),
            max_rate_samples: default_max_rate_samples(),
            steps: StepTable::default(),
        }
    }
}

impl AdaptiveConfig {
    /// Reject out-of-range values before a controller is built
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.window_duration_ms == 0 {
            return Err(QueueError::invalid_config(
                "window-duration-ms",
                self.window_duration_ms,
                "must be positive",
            ));
        }
        if self.recalc_debounce_ms == 0 {
            return Err(QueueError::invalid_config(
                "recalc-debounce-ms",
                self.recalc_debounce_ms,
                "must be positive",
            ));
        }
        if self.max_rate_samples == 0 {
            return Err(QueueError::invalid_config(
                "max-rate-samples",
                self.max_rate_samples,
                "must be positive",
            ));
        }
        if self.initial_concurrency == 0 {
            return Err(QueueError::invalid_config(
                "initial-concurrency",
                self.initial_concurrency,
                "must be positive",
            ));
        }
        self.steps.validate()
    }

    pub fn window_duration(&self) -> Duration {
        Duration::from_millis(self.window_duration_ms)
    }

    pub fn recalc_debounce(&self) -> Duration {
        Duration::from_millis(self.recalc_debounce_ms)
    }

    /// Configuration of the wrapped scheduler, seeded with the initial ceiling
    pub(crate) fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            auto_run: self.auto_run,
            concurrency_limit: self.initial_concurrency,
        }
    }
}
