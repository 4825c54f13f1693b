//! Adaptive scheduler: a Scheduler whose ceiling follows submission load

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::{Task, panic_message};
use crate::error::QueueError;
use crate::scheduler::{AddOptions, QueueEntry, QueueState, Scheduler, SchedulerStats};

use super::config::AdaptiveConfig;
use super::rate::RateTracker;
use super::steps::StepTable;
use super::throttle::{Gate, Throttle};

type Observer = Arc<dyn Fn(usize) + Send + Sync>;

/// Control-loop state protected by mutex
struct ControllerState {
    rate: RateTracker,
    throttle: Throttle,

    /// Submissions since the last recomputation
    added_since_adjust: usize,

    /// Trailing runs scheduled or still in progress
    trailing_runs: usize,
}

/// Applied ceilings waiting for the observer, oldest first
#[derive(Default)]
struct Outbox {
    limits: VecDeque<usize>,
    delivering: bool,
}

struct Controller {
    scheduler: Scheduler,
    steps: StepTable,
    state: Mutex<ControllerState>,
    observer: Mutex<Option<Observer>>,

    /// Held from rate read to limit write so ceilings apply in computed order
    adjust: Mutex<()>,
    outbox: Mutex<Outbox>,

    /// Signalled after each trailing run completes
    trailing_done: Notify,
}

impl Controller {
    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn outbox(&self) -> MutexGuard<'_, Outbox> {
        self.outbox.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Recompute the ceiling from the current rate; a no-op while quiescent
    fn recalculate(&self) -> Option<usize> {
        let target = {
            let _adjust = self.adjust.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let rps = {
                let mut state = self.lock();
                if state.added_since_adjust == 0 {
                    debug!("Controller::recalculate: no additions, skipping");
                    return None;
                }
                state.added_since_adjust = 0;
                state.rate.rps(Instant::now())
            };

            let target = self.steps.target(rps);
            let current = self.scheduler.concurrency_limit();
            debug!(rps, current, target, "Controller::recalculate: computed target");
            if target == current {
                return None;
            }

            if let Err(e) = self.scheduler.set_concurrency_limit(target) {
                warn!(error = %e, target, "Failed to apply concurrency limit");
                return None;
            }
            info!(rps, from = current, to = target, "Adaptive concurrency adjusted");
            self.outbox().limits.push_back(target);
            target
        };

        self.deliver();
        Some(target)
    }

    /// Hand queued ceilings to the observer in applied order
    ///
    /// One caller delivers at a time. A caller that finds delivery under way
    /// leaves its ceiling to the active deliverer, so the observer may call
    /// back into the queue.
    fn deliver(&self) {
        {
            let mut outbox = self.outbox();
            if outbox.delivering {
                return;
            }
            outbox.delivering = true;
        }

        loop {
            let limit = {
                let mut outbox = self.outbox();
                match outbox.limits.pop_front() {
                    Some(limit) => limit,
                    None => {
                        outbox.delivering = false;
                        return;
                    }
                }
            };

            let observer = self
                .observer
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone();
            if let Some(observer) = observer
                && let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| observer(limit)))
            {
                warn!(limit, panic = %panic_message(&*panic), "Concurrency observer panicked");
            }
        }
    }

    fn fire_trailing(&self) {
        debug!("Controller::fire_trailing: called");
        self.lock().throttle.fire_trailing(Instant::now());
        self.recalculate();

        let mut state = self.lock();
        state.trailing_runs = state.trailing_runs.saturating_sub(1);
        drop(state);
        self.trailing_done.notify_waiters();
    }
}

/// A scheduler that tunes its own concurrency ceiling
///
/// Every addition is timestamped into a sliding window. A throttled control
/// loop maps the observed submissions-per-second onto a step table and
/// pushes the result into the wrapped scheduler. The ceiling belongs to the
/// controller: `set_concurrency_limit` always fails.
#[derive(Clone)]
pub struct AdaptiveScheduler {
    controller: Arc<Controller>,
}

impl AdaptiveScheduler {
    /// Create a controller and its scheduler, seeded with `initial_concurrency`
    pub fn new(config: AdaptiveConfig) -> Result<Self, QueueError> {
        debug!(?config, "AdaptiveScheduler::new: called");
        config.validate()?;
        let scheduler = Scheduler::new(config.scheduler_config())?;

        Ok(Self {
            controller: Arc::new(Controller {
                scheduler,
                steps: config.steps.clone(),
                state: Mutex::new(ControllerState {
                    rate: RateTracker::new(config.window_duration(), config.max_rate_samples),
                    throttle: Throttle::new(config.recalc_debounce()),
                    added_since_adjust: 0,
                    trailing_runs: 0,
                }),
                observer: Mutex::new(None),
                adjust: Mutex::new(()),
                outbox: Mutex::new(Outbox::default()),
                trailing_done: Notify::new(),
            }),
        })
    }

    pub fn add_task<T: Send + 'static>(&self, task: Task<T>) -> Result<&Self, QueueError> {
        self.add_task_with(task, AddOptions::default())
    }

    pub fn add_task_with<T: Send + 'static>(&self, task: Task<T>, options: AddOptions) -> Result<&Self, QueueError> {
        self.controller.scheduler.add_task_with(task, options)?;
        self.record_additions(1);
        Ok(self)
    }

    pub fn bulk_add_tasks<T, I>(&self, tasks: I) -> Result<&Self, QueueError>
    where
        T: Send + 'static,
        I: IntoIterator<Item = Task<T>>,
    {
        self.bulk_add_tasks_with(tasks, AddOptions::default())
    }

    pub fn bulk_add_tasks_with<T, I>(&self, tasks: I, options: AddOptions) -> Result<&Self, QueueError>
    where
        T: Send + 'static,
        I: IntoIterator<Item = Task<T>>,
    {
        let tasks: Vec<_> = tasks.into_iter().collect();
        let count = tasks.len();
        self.controller.scheduler.bulk_add_tasks_with(tasks, options)?;
        if count > 0 {
            self.record_additions(count);
        }
        Ok(self)
    }

    fn record_additions(&self, count: usize) {
        let gate = {
            let mut state = self.controller.lock();
            let now = Instant::now();
            state.rate.record(now, count);
            state.added_since_adjust += count;
            let gate = state.throttle.request(now);
            if matches!(gate, Gate::Trailing(_)) {
                state.trailing_runs += 1;
            }
            gate
        };

        match gate {
            Gate::Run => {
                self.controller.recalculate();
            }
            Gate::Trailing(delay) => {
                debug!(?delay, "AdaptiveScheduler::record_additions: scheduling trailing recalculation");
                let controller: Weak<Controller> = Arc::downgrade(&self.controller);
                self.controller.scheduler.runtime().spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(controller) = controller.upgrade() {
                        controller.fire_trailing();
                    }
                });
            }
            Gate::Covered => {}
        }
    }

    /// Register the observer notified with each new ceiling, replacing any previous one
    pub fn on_concurrency_update<F>(&self, callback: F) -> &Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        *self
            .controller
            .observer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::new(callback));
        self
    }

    /// Recompute now, bypassing the throttle gate
    ///
    /// Still a no-op when nothing was added since the previous recomputation.
    /// Returns the new ceiling if it changed.
    pub fn recalculate(&self) -> Option<usize> {
        self.controller.recalculate()
    }

    /// Submissions per second over the trailing window
    pub fn rps(&self) -> f64 {
        self.controller.lock().rate.rps(Instant::now())
    }

    /// Submission timestamps currently retained
    pub fn rate_sample_count(&self) -> usize {
        self.controller.lock().rate.len()
    }

    pub fn concurrency_limit(&self) -> usize {
        self.controller.scheduler.concurrency_limit()
    }

    /// Always fails: the ceiling is owned by the control loop
    pub fn set_concurrency_limit(&self, limit: usize) -> Result<(), QueueError> {
        warn!(limit, "Rejected manual concurrency_limit write on adaptive scheduler");
        Err(QueueError::ConcurrencyLimitReadOnly)
    }

    pub fn run(&self) {
        self.controller.scheduler.run();
    }

    /// Wait until the queue drains and no trailing recalculation is outstanding
    ///
    /// The tail of a burst is only measured by the trailing run, so the
    /// ceiling reported after this returns reflects every addition made.
    pub async fn until_complete(&self) {
        loop {
            self.controller.scheduler.until_complete().await;

            let settled = self.controller.trailing_done.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();
            if self.controller.lock().trailing_runs == 0 {
                return;
            }
            debug!("AdaptiveScheduler::until_complete: waiting for trailing recalculation");
            settled.await;
        }
    }

    pub fn is_idle(&self) -> bool {
        self.controller.scheduler.is_idle()
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.controller.scheduler.contains_id(id)
    }

    pub fn queue_state(&self) -> QueueState {
        self.controller.scheduler.queue_state()
    }

    pub fn queue_details(&self) -> Vec<QueueEntry> {
        self.controller.scheduler.queue_details()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.controller.scheduler.stats()
    }
}

impl std::fmt::Debug for AdaptiveScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveScheduler")
            .field("scheduler", &self.controller.scheduler)
            .field("steps", &self.controller.steps)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sleeper(ms: u64) -> Task<()> {
        Task::new("sleep", move |_| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(())
        })
    }

    fn observed(queue: &AdaptiveScheduler) -> Arc<Mutex<Vec<usize>>> {
        let updates = Arc::new(Mutex::new(Vec::new()));
        let sink = updates.clone();
        queue.on_concurrency_update(move |limit| sink.lock().unwrap().push(limit));
        updates
    }

    #[tokio::test]
    async fn test_seed_limit() {
        let queue = AdaptiveScheduler::new(AdaptiveConfig::default()).unwrap();
        assert_eq!(queue.concurrency_limit(), 50);
        assert_eq!(queue.rps(), 0.0);
        assert!(queue.is_idle());
    }

    #[tokio::test]
    async fn test_manual_override_rejected() {
        let queue = AdaptiveScheduler::new(AdaptiveConfig::default()).unwrap();
        assert_eq!(queue.set_concurrency_limit(500), Err(QueueError::ConcurrencyLimitReadOnly));
        assert_eq!(queue.concurrency_limit(), 50);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let err = AdaptiveScheduler::new(AdaptiveConfig {
            recalc_debounce_ms: 0,
            ..Default::default()
        })
        .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_raises_limit() {
        let queue = AdaptiveScheduler::new(AdaptiveConfig::default()).unwrap();
        let updates = observed(&queue);

        for _ in 0..1500 {
            queue.add_task(sleeper(50)).unwrap();
        }
        assert!(queue.rps() > 1000.0);

        queue.until_complete().await;
        assert!(queue.concurrency_limit() >= 200);
        assert_eq!(*updates.lock().unwrap().last().unwrap(), queue.concurrency_limit());
        assert_eq!(queue.stats().total_resolved, 1500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_update_for_one_burst() {
        let queue = AdaptiveScheduler::new(AdaptiveConfig::default()).unwrap();
        let updates = observed(&queue);

        for _ in 0..500 {
            queue.add_task(sleeper(10)).unwrap();
        }
        queue.until_complete().await;
        queue.until_complete().await;

        // Let any trailing recalculation run
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(updates.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiescent_loop_is_noop() {
        let queue = AdaptiveScheduler::new(AdaptiveConfig::default()).unwrap();
        let updates = observed(&queue);

        queue.add_task(sleeper(1)).unwrap();
        assert_eq!(*updates.lock().unwrap(), vec![100]);

        queue.until_complete().await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(queue.recalculate(), None);
        assert_eq!(updates.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trailing_recalculation_within_debounce() {
        let queue = AdaptiveScheduler::new(AdaptiveConfig::default()).unwrap();
        let updates = observed(&queue);

        // Leading edge sees a single submission
        queue.add_task(sleeper(1000)).unwrap();
        assert_eq!(queue.concurrency_limit(), 100);

        queue.bulk_add_tasks((0..1199).map(|_| sleeper(1000))).unwrap();
        assert_eq!(queue.concurrency_limit(), 100);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(queue.concurrency_limit(), 200);
        assert_eq!(*updates.lock().unwrap(), vec![100, 200]);
        assert_eq!(queue.queue_state().in_flight, 200);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_decays_after_window() {
        let queue = AdaptiveScheduler::new(AdaptiveConfig::default()).unwrap();
        queue.bulk_add_tasks((0..20).map(|_| sleeper(1))).unwrap();
        assert_eq!(queue.rps(), 20.0);
        assert_eq!(queue.rate_sample_count(), 20);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(queue.rps(), 0.0);
    }

    #[tokio::test]
    async fn test_failed_add_not_counted() {
        let queue = AdaptiveScheduler::new(AdaptiveConfig::default()).unwrap();
        let updates = observed(&queue);

        assert!(queue.add_task(Task::new("", |_| async { Ok(()) })).is_err());
        assert_eq!(queue.rate_sample_count(), 0);
        assert!(updates.lock().unwrap().is_empty());
        assert_eq!(queue.concurrency_limit(), 50);
    }

    #[tokio::test]
    async fn test_observer_replaced() {
        let queue = AdaptiveScheduler::new(AdaptiveConfig::default()).unwrap();
        let first = observed(&queue);
        let second = observed(&queue);

        queue.add_task(Task::new("noop", |_| async { Ok(()) })).unwrap();
        queue.until_complete().await;

        assert!(first.lock().unwrap().is_empty());
        assert_eq!(*second.lock().unwrap(), vec![100]);
    }

    fn instant() -> Task<()> {
        Task::new("instant", |_| async { Ok(()) })
    }

    #[tokio::test(start_paused = true)]
    async fn test_instant_burst_settles_before_until_complete_returns() {
        let queue = AdaptiveScheduler::new(AdaptiveConfig::default()).unwrap();
        let updates = observed(&queue);

        for _ in 0..1500 {
            queue.add_task(instant()).unwrap();
        }
        queue.until_complete().await;

        assert_eq!(queue.concurrency_limit(), 200);
        assert_eq!(*updates.lock().unwrap(), vec![100, 200]);
        assert_eq!(queue.stats().total_resolved, 1500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reentrant_observer_sees_updates_in_order() {
        let queue = AdaptiveScheduler::new(AdaptiveConfig::default()).unwrap();
        let updates = Arc::new(Mutex::new(Vec::new()));

        let (handle, sink) = (queue.clone(), updates.clone());
        queue.on_concurrency_update(move |limit| {
            if limit == 100 {
                handle.bulk_add_tasks((0..1500).map(|_| instant())).unwrap();
                assert_eq!(handle.recalculate(), Some(200));
            }
            sink.lock().unwrap().push(limit);
        });

        queue.add_task(instant()).unwrap();
        queue.until_complete().await;

        assert_eq!(*updates.lock().unwrap(), vec![100, 200]);
        assert_eq!(queue.concurrency_limit(), 200);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_recalculation_ends_on_applied_limit() {
        let queue = AdaptiveScheduler::new(AdaptiveConfig::default()).unwrap();
        let updates = observed(&queue);

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    for _ in 0..20 {
                        queue.bulk_add_tasks((0..10).map(|_| instant())).unwrap();
                        queue.recalculate();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.await.unwrap();
        }
        queue.until_complete().await;

        let updates = updates.lock().unwrap();
        assert_eq!(updates.last().copied(), Some(queue.concurrency_limit()));
        assert!(updates.windows(2).all(|pair| pair[0] != pair[1]));
    }

    #[tokio::test]
    async fn test_panicking_observer_does_not_block_updates() {
        let queue = AdaptiveScheduler::new(AdaptiveConfig::default()).unwrap();
        queue.on_concurrency_update(|_| panic!("observer failed"));

        queue.add_task(instant()).unwrap();
        assert_eq!(queue.concurrency_limit(), 100);

        let updates = observed(&queue);
        queue.bulk_add_tasks((0..1500).map(|_| instant())).unwrap();
        queue.until_complete().await;
        assert_eq!(*updates.lock().unwrap(), vec![200]);
    }
}
