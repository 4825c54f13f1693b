//! Queue types for the scheduler

use std::collections::BinaryHeap;
use std::time::Duration;

use tokio::time::Instant;

use crate::domain::{Job, Priority};

/// A pending task waiting in the priority store
pub(crate) struct PendingTask {
    pub job: Job,
    pub seq: u64,
    pub submitted_at: Instant,
}

impl PendingTask {
    pub fn priority(&self) -> Priority {
        self.job.priority
    }
}

impl Eq for PendingTask {}

impl PartialEq for PendingTask {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Ord for PendingTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Lower rank first, then earlier submission (max-heap, so both reversed)
        other
            .priority()
            .cmp(&self.priority())
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for PendingTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Pending tasks served by ascending priority rank, ties in insertion order
#[derive(Default)]
pub(crate) struct PriorityStore {
    heap: BinaryHeap<PendingTask>,
    next_seq: u64,
}

impl PriorityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a job, stamping it with the next insertion sequence number
    pub fn push(&mut self, job: Job, now: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(PendingTask {
            job,
            seq,
            submitted_at: now,
        });
    }

    /// Remove the next task to serve
    pub fn pop(&mut self) -> Option<PendingTask> {
        self.heap.pop()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Pending tasks in service order
    pub fn ordered(&self) -> Vec<&PendingTask> {
        let mut tasks: Vec<_> = self.heap.iter().collect();
        tasks.sort_by(|a, b| b.cmp(a));
        tasks
    }
}

/// Statistics for the scheduler
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SchedulerStats {
    pub total_added: u64,
    pub total_started: u64,
    pub total_resolved: u64,
    pub total_rejected: u64,
    /// Accumulated time tasks spent pending before starting
    pub total_wait_time_ms: u64,
    pub peak_pending: usize,
    pub peak_in_flight: usize,
}

impl SchedulerStats {
    /// Tasks that reached Done
    pub fn total_completed(&self) -> u64 {
        self.total_resolved + self.total_rejected
    }

    /// Mean time a started task spent pending
    pub fn avg_wait(&self) -> Duration {
        if self.total_started == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(self.total_wait_time_ms / self.total_started)
    }
}

/// Point-in-time queue state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueState {
    pub pending: usize,
    pub in_flight: usize,
    pub concurrency_limit: usize,
    pub stats: SchedulerStats,
}

impl QueueState {
    /// No pending and no running work
    pub fn is_idle(&self) -> bool {
        self.pending == 0 && self.in_flight == 0
    }
}

/// Queue entry for display
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub task_type: String,
    pub id: Option<String>,
    pub priority: Priority,
    pub status: QueueEntryStatus,
    /// Time pending (Pending) or time running (Running)
    pub elapsed: Duration,
}

/// Status of a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEntryStatus {
    Running,
    Pending,
}
