//! Submission-rate to concurrency step table

use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// One row of the step table: at or above `min_rps`, use `limit`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConcurrencyStep {
    pub min_rps: f64,
    pub limit: usize,
}

impl ConcurrencyStep {
    pub const fn new(min_rps: f64, limit: usize) -> Self {
        Self { min_rps, limit }
    }
}

/// Monotonic mapping from submission rate to concurrency ceiling
///
/// The defaults are empirical and meant to be tuned per deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StepTable {
    /// Ceiling used below the first step
    #[serde(default = "default_floor")]
    pub floor: usize,

    /// Steps in ascending `min_rps` order
    #[serde(default = "default_steps")]
    pub steps: Vec<ConcurrencyStep>,
}

fn default_floor() -> usize {
    100
}

fn default_steps() -> Vec<ConcurrencyStep> {
    vec![
        ConcurrencyStep::new(1_000.0, 200),
        ConcurrencyStep::new(5_000.0, 500),
        ConcurrencyStep::new(7_000.0, 800),
        ConcurrencyStep::new(10_000.0, 1_000),
    ]
}

impl Default for StepTable {
    fn default() -> Self {
        Self {
            floor: default_floor(),
            steps: default_steps(),
        }
    }
}

impl StepTable {
    /// Target ceiling for an observed rate
    pub fn target(&self, rps: f64) -> usize {
        self.steps
            .iter()
            .rev()
            .find(|step| rps >= step.min_rps)
            .map(|step| step.limit)
            .unwrap_or(self.floor)
    }

    /// Check the table is positive and monotonically increasing
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.floor == 0 {
            return Err(QueueError::invalid_config("steps.floor", self.floor, "must be positive"));
        }

        let mut prev_rps = 0.0;
        let mut prev_limit = self.floor;
        for step in &self.steps {
            if !step.min_rps.is_finite() || step.min_rps <= prev_rps {
                return Err(QueueError::invalid_config(
                    "steps.min-rps",
                    step.min_rps,
                    "must be finite, positive and strictly ascending",
                ));
            }
            if step.limit < prev_limit {
                return Err(QueueError::invalid_config(
                    "steps.limit",
                    step.limit,
                    "must not decrease as min-rps grows",
                ));
            }
            prev_rps = step.min_rps;
            prev_limit = step.limit;
        }
        Ok(())
    }
}
