//! Scheduler implementation

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::domain::{Job, Priority, Settlement, Task};
use crate::error::QueueError;

use super::config::{AddOptions, SchedulerConfig, validate_concurrency_limit};
use super::queue::{PriorityStore, QueueEntry, QueueEntryStatus, QueueState, SchedulerStats};

/// Bookkeeping for a task occupying a concurrency slot
struct RunningTask {
    task_type: String,
    id: Option<String>,
    priority: Priority,
    started_at: Instant,
}

/// Internal state protected by mutex
struct SchedulerInner {
    auto_run: bool,
    concurrency_limit: usize,

    /// Pending tasks
    store: PriorityStore,

    /// Running tasks keyed by insertion sequence
    running: BTreeMap<u64, RunningTask>,

    /// Ids of pending and running tasks
    ids: HashSet<String>,

    stats: SchedulerStats,
}

impl SchedulerInner {
    fn is_idle(&self) -> bool {
        self.store.is_empty() && self.running.is_empty()
    }

    /// Pop as many pending tasks as there are free slots
    fn take_ready(&mut self) -> Vec<(u64, Job)> {
        let now = Instant::now();
        let mut ready = Vec::new();
        while self.running.len() < self.concurrency_limit {
            let Some(next) = self.store.pop() else {
                break;
            };
            let waited = now.saturating_duration_since(next.submitted_at);
            self.stats.total_wait_time_ms += waited.as_millis() as u64;
            self.stats.total_started += 1;
            self.running.insert(
                next.seq,
                RunningTask {
                    task_type: next.job.task_type.clone(),
                    id: next.job.id.clone(),
                    priority: next.job.priority,
                    started_at: now,
                },
            );
            self.stats.peak_in_flight = self.stats.peak_in_flight.max(self.running.len());
            ready.push((next.seq, next.job));
        }
        ready
    }
}

struct Shared {
    inner: Mutex<SchedulerInner>,
    drained: Notify,
    runtime: Handle,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SchedulerInner> {
        // Hooks never run under this lock, so a poisoned guard still holds consistent state
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Priority-ordered, concurrency-bounded task queue
///
/// Pending tasks are served by ascending priority rank, ties in submission
/// order. At most `concurrency_limit` actions run at once; a finished task
/// frees its slot and the next pending task starts without an external
/// trigger. `Scheduler` is a cheap handle: clones share the same queue.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Create a new scheduler on the current tokio runtime
    pub fn new(config: SchedulerConfig) -> Result<Self, QueueError> {
        debug!(?config, "Scheduler::new: called");
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| QueueError::NoRuntime)?;

        Ok(Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(SchedulerInner {
                    auto_run: config.auto_run,
                    concurrency_limit: config.concurrency_limit,
                    store: PriorityStore::new(),
                    running: BTreeMap::new(),
                    ids: HashSet::new(),
                    stats: SchedulerStats::default(),
                }),
                drained: Notify::new(),
                runtime,
            }),
        })
    }

    /// Add one task using the queue-level `auto_run`
    pub fn add_task<T: Send + 'static>(&self, task: Task<T>) -> Result<&Self, QueueError> {
        self.add_task_with(task, AddOptions::default())
    }

    /// Add one task; a per-call `auto_run` overrides the queue default
    pub fn add_task_with<T: Send + 'static>(&self, task: Task<T>, options: AddOptions) -> Result<&Self, QueueError> {
        debug!(task_type = %task.task_type(), id = ?task.id(), priority = %task.priority(), "Scheduler::add_task: called");
        self.admit(vec![task], options)
    }

    /// Add a batch of tasks with a single scheduling pass
    ///
    /// The batch is all-or-nothing: if any task is malformed or carries a
    /// colliding id, nothing is enqueued.
    pub fn bulk_add_tasks<T, I>(&self, tasks: I) -> Result<&Self, QueueError>
    where
        T: Send + 'static,
        I: IntoIterator<Item = Task<T>>,
    {
        self.bulk_add_tasks_with(tasks, AddOptions::default())
    }

    /// Batch form of `add_task_with`
    pub fn bulk_add_tasks_with<T, I>(&self, tasks: I, options: AddOptions) -> Result<&Self, QueueError>
    where
        T: Send + 'static,
        I: IntoIterator<Item = Task<T>>,
    {
        let tasks: Vec<_> = tasks.into_iter().collect();
        debug!(count = tasks.len(), "Scheduler::bulk_add_tasks: called");
        self.admit(tasks, options)
    }

    fn admit<T: Send + 'static>(&self, tasks: Vec<Task<T>>, options: AddOptions) -> Result<&Self, QueueError> {
        for task in &tasks {
            task.validate()?;
        }

        let auto_run = {
            let mut inner = self.shared.lock();

            let mut batch_ids = HashSet::new();
            for id in tasks.iter().filter_map(|t| t.id()) {
                if inner.ids.contains(id) || !batch_ids.insert(id) {
                    debug!(%id, "Scheduler::admit: duplicate id, rejecting");
                    return Err(QueueError::DuplicateId { id: id.to_string() });
                }
            }

            let now = Instant::now();
            for task in tasks {
                if let Some(id) = task.id() {
                    inner.ids.insert(id.to_string());
                }
                inner.store.push(task.into_job(), now);
                inner.stats.total_added += 1;
            }
            inner.stats.peak_pending = inner.stats.peak_pending.max(inner.store.len());

            options.auto_run_or(inner.auto_run)
        };

        if auto_run {
            self.run();
        } else {
            debug!("Scheduler::admit: auto_run off, deferring");
        }
        Ok(self)
    }

    /// Start as many pending tasks as the concurrency limit allows
    pub fn run(&self) {
        let ready = self.shared.lock().take_ready();
        if !ready.is_empty() {
            debug!(started = ready.len(), "Scheduler::run: starting tasks");
        }
        for (key, job) in ready {
            self.spawn(key, job);
        }
    }

    fn spawn(&self, key: u64, job: Job) {
        let mut slot = SlotGuard {
            scheduler: self.clone(),
            key,
            settlement: None,
        };
        let action = job.run();
        self.shared.runtime.spawn(async move {
            let _ = &slot;
            slot.settlement = Some(action.await);
        });
    }

    /// Called once per task after its hooks have fired
    fn release(&self, key: u64, settlement: Option<Settlement>) {
        let (ready, idle) = {
            let mut inner = self.shared.lock();
            if let Some(task) = inner.running.remove(&key) {
                if let Some(id) = &task.id {
                    inner.ids.remove(id);
                }
                debug!(task_type = %task.task_type, ?settlement, "Scheduler::release: task done");
            }
            match settlement {
                Some(Settlement::Resolved) => inner.stats.total_resolved += 1,
                // A hook panicked before the task could report
                Some(Settlement::Rejected) | None => inner.stats.total_rejected += 1,
            }
            let ready = inner.take_ready();
            (ready, inner.is_idle())
        };

        for (key, job) in ready {
            self.spawn(key, job);
        }

        if idle {
            debug!("Scheduler::release: drained");
            self.shared.drained.notify_waiters();
        }
    }

    /// Resolve once no task is pending or running
    ///
    /// With `auto_run` off, pending tasks only drain after `run()`.
    pub async fn until_complete(&self) {
        loop {
            let notified = self.shared.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Current ceiling on simultaneously running tasks
    pub fn concurrency_limit(&self) -> usize {
        self.shared.lock().concurrency_limit
    }

    /// Change the ceiling; a raised limit is filled at once when `auto_run` is on
    pub fn set_concurrency_limit(&self, limit: usize) -> Result<(), QueueError> {
        validate_concurrency_limit(limit)?;
        let auto_run = {
            let mut inner = self.shared.lock();
            if inner.concurrency_limit != limit {
                info!(from = inner.concurrency_limit, to = limit, "Concurrency limit changed");
            }
            inner.concurrency_limit = limit;
            inner.auto_run
        };
        if auto_run {
            self.run();
        }
        Ok(())
    }

    pub fn is_idle(&self) -> bool {
        self.shared.lock().is_idle()
    }

    pub fn pending_count(&self) -> usize {
        self.shared.lock().store.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.shared.lock().running.len()
    }

    /// Whether a pending or running task carries this id
    pub fn contains_id(&self, id: &str) -> bool {
        self.shared.lock().ids.contains(id)
    }

    /// Get current queue state
    pub fn queue_state(&self) -> QueueState {
        let inner = self.shared.lock();
        QueueState {
            pending: inner.store.len(),
            in_flight: inner.running.len(),
            concurrency_limit: inner.concurrency_limit,
            stats: inner.stats.clone(),
        }
    }

    /// Running tasks (oldest first) followed by pending tasks in service order
    pub fn queue_details(&self) -> Vec<QueueEntry> {
        let inner = self.shared.lock();
        let now = Instant::now();

        inner
            .running
            .values()
            .map(|r| QueueEntry {
                task_type: r.task_type.clone(),
                id: r.id.clone(),
                priority: r.priority,
                status: QueueEntryStatus::Running,
                elapsed: now.saturating_duration_since(r.started_at),
            })
            .chain(inner.store.ordered().into_iter().map(|p| QueueEntry {
                task_type: p.job.task_type.clone(),
                id: p.job.id.clone(),
                priority: p.job.priority,
                status: QueueEntryStatus::Pending,
                elapsed: now.saturating_duration_since(p.submitted_at),
            }))
            .collect()
    }

    /// Get the scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        self.shared.lock().stats.clone()
    }

    /// Runtime the scheduler spawns onto
    pub(crate) fn runtime(&self) -> &Handle {
        &self.shared.runtime
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.queue_state();
        f.debug_struct("Scheduler")
            .field("pending", &state.pending)
            .field("in_flight", &state.in_flight)
            .field("concurrency_limit", &state.concurrency_limit)
            .finish()
    }
}

/// Frees a concurrency slot when the spawned task ends, even if dropped unsettled
struct SlotGuard {
    scheduler: Scheduler,
    key: u64,
    settlement: Option<Settlement>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.scheduler.release(self.key, self.settlement.take());
    }
}
