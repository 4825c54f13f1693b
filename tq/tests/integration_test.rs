//! Integration tests for taskqueue
//!
//! These tests verify end-to-end behavior through the public API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use eyre::eyre;
use taskqueue::{AdaptiveConfig, AdaptiveScheduler, AddOptions, Priority, QueueError, Scheduler, SchedulerConfig, Task};
use tokio::sync::Semaphore;

fn scheduler(limit: usize) -> Scheduler {
    Scheduler::new(SchedulerConfig {
        concurrency_limit: limit,
        ..Default::default()
    })
    .expect("Failed to create scheduler")
}

fn recording(name: &'static str, order: &Arc<Mutex<Vec<&'static str>>>) -> Task<()> {
    let order = order.clone();
    Task::new(name, move |_| async move {
        order.lock().unwrap().push(name);
        Ok(())
    })
}

// =============================================================================
// Scheduler Tests
// =============================================================================

#[tokio::test]
async fn test_bulk_priority_order() {
    let queue = scheduler(10);
    let order = Arc::new(Mutex::new(Vec::new()));

    queue
        .bulk_add_tasks(vec![
            recording("low", &order).with_priority(3),
            recording("med", &order).with_priority(1),
            recording("high", &order).with_priority(0),
        ])
        .unwrap();
    queue.until_complete().await;

    assert_eq!(*order.lock().unwrap(), vec!["high", "med", "low"]);
}

#[tokio::test]
async fn test_individual_adds_ordered_when_deferred() {
    let queue = scheduler(10);
    let order = Arc::new(Mutex::new(Vec::new()));

    queue
        .add_task_with(recording("low", &order).with_priority(3), AddOptions::deferred())
        .unwrap()
        .add_task_with(recording("med", &order).with_priority(1), AddOptions::deferred())
        .unwrap()
        .add_task_with(recording("high", &order).with_priority(0), AddOptions::deferred())
        .unwrap();
    assert_eq!(queue.pending_count(), 3);

    queue.run();
    queue.until_complete().await;
    assert_eq!(*order.lock().unwrap(), vec!["high", "med", "low"]);
}

#[tokio::test]
async fn test_failing_action_rejects_then_done() {
    let queue = scheduler(1);
    let events = Arc::new(Mutex::new(Vec::new()));

    let (on_res, on_rej, on_done) = (events.clone(), events.clone(), events.clone());
    queue
        .add_task(
            Task::new("fails", |_| async { Err::<(), _>(eyre!("fail")) })
                .on_resolve(move |_| on_res.lock().unwrap().push("resolve".to_string()))
                .on_reject(move |e| on_rej.lock().unwrap().push(format!("reject:{}", e)))
                .on_done(move || on_done.lock().unwrap().push("done".to_string())),
        )
        .unwrap();
    queue.until_complete().await;

    assert_eq!(*events.lock().unwrap(), vec!["reject:fail", "done"]);
}

#[tokio::test]
async fn test_duplicate_id_before_settle() {
    let queue = scheduler(2);
    let gate = Arc::new(Semaphore::new(0));

    let hold = gate.clone();
    queue
        .add_task(
            Task::new("slow", move |_| async move {
                let _permit = hold.acquire().await?;
                Ok(())
            })
            .with_id("same"),
        )
        .unwrap();

    let err = queue
        .add_task(Task::new("again", |_| async { Ok(()) }).with_id("same"))
        .unwrap_err();
    assert!(matches!(err, QueueError::DuplicateId { ref id } if id == "same"));

    gate.add_permits(1);
    queue.until_complete().await;

    // Done ids are free again
    queue
        .add_task(Task::new("again", |_| async { Ok(()) }).with_id("same"))
        .unwrap();
    queue.until_complete().await;
}

#[tokio::test]
async fn test_until_complete_waits_for_last_done() {
    let queue = scheduler(2);
    let done = Arc::new(AtomicUsize::new(0));

    for _ in 0..6 {
        let done = done.clone();
        queue
            .add_task(
                Task::new("tick", |_| async {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(())
                })
                .on_done(move || {
                    done.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
    }

    queue.until_complete().await;
    assert_eq!(done.load(Ordering::SeqCst), 6);
    assert!(queue.is_idle());

    // Idle queue resolves immediately
    tokio::time::timeout(Duration::from_millis(50), queue.until_complete())
        .await
        .expect("idle queue should resolve at once");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bound_holds_on_multi_thread_runtime() {
    let queue = scheduler(5);
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..200)
        .map(|i| {
            let (active, peak, done) = (active.clone(), peak.clone(), done.clone());
            Task::new("work", move |_| async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                if i % 10 == 0 {
                    return Err(eyre!("task {} failed", i));
                }
                Ok(i)
            })
            .with_priority(Priority((i % 4) as i32))
            .on_done(move || {
                done.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    queue.bulk_add_tasks(tasks).unwrap();
    tokio::time::timeout(Duration::from_secs(10), queue.until_complete())
        .await
        .expect("queue should drain");

    assert!(peak.load(Ordering::SeqCst) <= 5);
    assert_eq!(done.load(Ordering::SeqCst), 200);

    let stats = queue.stats();
    assert_eq!(stats.total_resolved, 180);
    assert_eq!(stats.total_rejected, 20);
    assert!(stats.peak_in_flight <= 5);
}

#[tokio::test]
async fn test_invalid_task_enqueues_nothing() {
    let queue = scheduler(1);
    let err = queue.add_task(Task::new("", |_| async { Ok(()) })).unwrap_err();
    assert_eq!(err, QueueError::EmptyTaskType);
    assert!(err.to_string().contains("type"));
    assert!(queue.is_idle());
    assert_eq!(queue.stats().total_added, 0);
}

// =============================================================================
// Adaptive Scheduler Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_adaptive_burst_reaches_200() {
    let queue = AdaptiveScheduler::new(AdaptiveConfig::default()).unwrap();
    assert_eq!(queue.concurrency_limit(), 50);

    for _ in 0..1500 {
        queue
            .add_task(Task::new("burst", |_| async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(())
            }))
            .unwrap();
    }
    assert!(queue.rps() > 1000.0);

    queue.until_complete().await;
    assert!(queue.concurrency_limit() >= 200);
}

#[tokio::test(start_paused = true)]
async fn test_adaptive_instant_burst_reaches_200() {
    let queue = AdaptiveScheduler::new(AdaptiveConfig::default()).unwrap();

    for _ in 0..1500 {
        queue.add_task(Task::new("burst", |_| async { Ok(()) })).unwrap();
    }
    queue.until_complete().await;

    assert!(queue.concurrency_limit() >= 200, "limit was {}", queue.concurrency_limit());
}

#[tokio::test]
async fn test_adaptive_instant_burst_reaches_200_in_real_time() {
    let queue = AdaptiveScheduler::new(AdaptiveConfig::default()).unwrap();

    for _ in 0..1500 {
        queue.add_task(Task::new("burst", |_| async { Ok(()) })).unwrap();
    }
    tokio::time::timeout(Duration::from_secs(5), queue.until_complete())
        .await
        .expect("queue should drain");

    assert!(queue.concurrency_limit() >= 200, "limit was {}", queue.concurrency_limit());
}

#[tokio::test]
async fn test_panicking_hook_still_fires_done() {
    let queue = scheduler(1);
    let done = Arc::new(AtomicUsize::new(0));

    let counter = done.clone();
    queue
        .add_task(
            Task::new("hook", |_| async { Ok(()) })
                .on_resolve(|_| panic!("hook"))
                .on_done(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
        )
        .unwrap();
    queue.until_complete().await;

    assert_eq!(done.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_adaptive_single_notification() {
    let queue = AdaptiveScheduler::new(AdaptiveConfig::default()).unwrap();
    let notifications = Arc::new(AtomicUsize::new(0));
    let counter = notifications.clone();
    queue.on_concurrency_update(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    for _ in 0..500 {
        queue.add_task(Task::new("once", |_| async { Ok(()) })).unwrap();
    }
    queue.until_complete().await;
    queue.until_complete().await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(notifications.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_adaptive_limit_is_read_only() {
    let queue = AdaptiveScheduler::new(AdaptiveConfig::default()).unwrap();
    let err = queue.set_concurrency_limit(10).unwrap_err();
    assert_eq!(err, QueueError::ConcurrencyLimitReadOnly);
    assert_eq!(queue.concurrency_limit(), 50);
}

#[tokio::test]
async fn test_adaptive_rejects_bad_construction() {
    let err = AdaptiveScheduler::new(AdaptiveConfig {
        window_duration_ms: 0,
        ..Default::default()
    })
    .unwrap_err();
    assert!(err.to_string().contains("window-duration-ms"));
}
