//! Minimum-spacing gate for the control loop

use std::time::Duration;

use tokio::time::Instant;

/// What the caller should do with a throttled request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Run now; the gate has recorded this as the latest run
    Run,

    /// Too soon: run once after this delay, then call `fire_trailing`
    Trailing(Duration),

    /// A trailing run is already scheduled and will cover this request
    Covered,
}

/// Last-invocation timestamp plus a minimum interval
///
/// The first request after a quiet period runs at once (leading edge).
/// Requests inside the interval collapse into a single trailing run at
/// `last_run + interval`.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last_run: Option<Instant>,
    trailing_at: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_run: None,
            trailing_at: None,
        }
    }

    pub fn request(&mut self, now: Instant) -> Gate {
        if self.trailing_at.is_some() {
            return Gate::Covered;
        }

        match self.last_run {
            Some(last) if now.saturating_duration_since(last) < self.interval => {
                let at = last + self.interval;
                self.trailing_at = Some(at);
                Gate::Trailing(at.saturating_duration_since(now))
            }
            _ => {
                self.last_run = Some(now);
                Gate::Run
            }
        }
    }

    /// Mark the scheduled trailing run as happening now
    pub fn fire_trailing(&mut self, now: Instant) {
        self.trailing_at = None;
        self.last_run = Some(now);
    }

    pub fn last_run(&self) -> Option<Instant> {
        self.last_run
    }
}
