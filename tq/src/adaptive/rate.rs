//! Sliding-window submission rate tracking

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Submission timestamps within a trailing window
///
/// Old entries are trimmed from the front on every access. The list is also
/// hard-capped at `max_samples` so sustained extreme load cannot grow it
/// without bound.
#[derive(Debug, Clone)]
pub struct RateTracker {
    samples: VecDeque<Instant>,
    window: Duration,
    max_samples: usize,
}

impl RateTracker {
    pub fn new(window: Duration, max_samples: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            window,
            max_samples,
        }
    }

    /// Record `count` submissions at `now`
    pub fn record(&mut self, now: Instant, count: usize) {
        for _ in 0..count {
            self.samples.push_back(now);
        }
        self.trim(now);
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
    }

    /// Submissions per second over the trailing window
    pub fn rps(&mut self, now: Instant) -> f64 {
        self.trim(now);
        self.samples.len() as f64 / self.window.as_secs_f64()
    }

    /// Samples currently held
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn trim(&mut self, now: Instant) {
        let Some(window_start) = now.checked_sub(self.window) else {
            return;
        };
        while self.samples.front().is_some_and(|t| *t < window_start) {
            self.samples.pop_front();
        }
    }
}
