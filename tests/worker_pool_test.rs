//! Integration tests for ThreadPool
//!
//! These tests validate real-world functionality including:
//! - Basic execution and concurrent submission
//! - Priority ordering on a single worker
//! - Cancellation before and after an item starts
//! - Post-execute callbacks per policy
//! - Faulted callbacks (errors and panics)
//! - Thread growth, retirement and bounds changes
//! - Worker hooks, statistics and caller-context propagation
//! - Graceful and timed shutdown

use prometheus_thread_pool::config::PoolConfig;
use prometheus_thread_pool::core::{
    ContextCapture, ContextSnapshot, PoolError, ThreadPool, WorkItemOptions, WorkItemState,
    WorkScheduler, WorkerHooks,
};
use prometheus_thread_pool::util::serde::{PostExecutePolicy, Priority};
use prometheus_thread_pool::util::telemetry::init_tracing_with;
use rand::seq::SliceRandom;
use std::cell::RefCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

const LONG: Duration = Duration::from_secs(10);

fn pool(max_threads: usize) -> ThreadPool {
    init_tracing_with("prometheus_thread_pool=warn");
    ThreadPool::new(
        PoolConfig::new()
            .with_name("it-pool")
            .with_max_threads(max_threads)
            .with_idle_timeout(Duration::from_millis(100)),
    )
    .unwrap()
}

fn suspended_pool(max_threads: usize) -> ThreadPool {
    ThreadPool::new(
        PoolConfig::new()
            .with_name("it-suspended")
            .with_max_threads(max_threads)
            .with_start_suspended(true),
    )
    .unwrap()
}

/// Poll `check` until it holds or `timeout` elapses.
fn eventually(timeout: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    check()
}

// ============================================================================
// EXECUTION
// ============================================================================

#[test]
fn test_basic_execution() {
    let pool = pool(2);
    let handle = pool.submit(|ctx| Ok(format!("hello from {}", ctx.pool_name()))).unwrap();

    assert_eq!(handle.get_result().unwrap(), "hello from it-pool");
    assert_eq!(handle.state(), WorkItemState::Completed);
    assert!(handle.is_completed());
    assert!(!handle.is_canceled());
    assert_eq!(handle.priority(), Priority::Normal);
    pool.shutdown();
}

#[test]
fn test_concurrent_submission() {
    let pool = Arc::new(pool(4));
    let mut submitters = Vec::new();
    for t in 0..4u64 {
        let pool = Arc::clone(&pool);
        submitters.push(std::thread::spawn(move || {
            (0..50u64)
                .map(|i| pool.submit(move |_ctx| Ok(t * 1_000 + i)).unwrap())
                .collect::<Vec<_>>()
        }));
    }

    let mut total = 0u64;
    for submitter in submitters {
        for handle in submitter.join().unwrap() {
            total += handle.get_result_timeout(LONG).unwrap();
        }
    }
    let expected: u64 = (0..4u64)
        .map(|t| (0..50u64).map(|i| t * 1_000 + i).sum::<u64>())
        .sum();
    assert_eq!(total, expected);
    assert!(pool.wait_for_idle(Some(LONG)).unwrap());
    pool.shutdown();
}

#[test]
fn test_highest_priority_runs_first() {
    let pool = suspended_pool(1);
    let order = Arc::new(Mutex::new(Vec::new()));

    for i in 0..100u32 {
        let order = Arc::clone(&order);
        pool.submit(move |_ctx| {
            order.lock().unwrap().push(i);
            Ok(())
        })
        .unwrap();
    }
    let urgent_order = Arc::clone(&order);
    pool.submit_with_priority(
        move |_ctx| {
            urgent_order.lock().unwrap().push(u32::MAX);
            Ok(())
        },
        Priority::Highest,
    )
    .unwrap();

    assert_eq!(pool.threads_alive(), 0);
    assert_eq!(pool.pending_count(), 101);
    pool.start();
    assert!(pool.wait_for_idle(Some(LONG)).unwrap());

    let order = order.lock().unwrap();
    assert_eq!(order.len(), 101);
    assert_eq!(order[0], u32::MAX);
    // FIFO within the same priority.
    assert!(order[1..].windows(2).all(|w| w[0] < w[1]));
    pool.shutdown();
}

#[test]
fn test_shuffled_priorities_drain_in_order() {
    let pool = suspended_pool(1);
    let mut priorities: Vec<Priority> = Priority::ALL
        .iter()
        .flat_map(|p| std::iter::repeat_n(*p, 10))
        .collect();
    priorities.shuffle(&mut rand::rng());

    let seen = Arc::new(Mutex::new(Vec::new()));
    for priority in &priorities {
        let seen = Arc::clone(&seen);
        pool.submit_with_priority(
            move |ctx| {
                seen.lock().unwrap().push(ctx.priority());
                Ok(())
            },
            *priority,
        )
        .unwrap();
    }
    pool.start();
    assert!(pool.wait_for_idle(Some(LONG)).unwrap());

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), priorities.len());
    assert!(seen.windows(2).all(|w| w[0] >= w[1]));
    pool.shutdown();
}

// ============================================================================
// CANCELLATION AND POST-EXECUTE
// ============================================================================

#[test]
fn test_cancel_before_dequeue_runs_post_execute() {
    let pool = suspended_pool(1);
    let ran = Arc::new(AtomicUsize::new(0));
    let post = Arc::new(Mutex::new(None));

    let job_ran = Arc::clone(&ran);
    let post_state = Arc::clone(&post);
    let handle = pool
        .submit_with(
            move |_ctx| {
                job_ran.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            },
            WorkItemOptions::new()
                .with_post_execute(move |h| *post_state.lock().unwrap() = Some(h.state()))
                .with_post_execute_policy(PostExecutePolicy::WhenCanceled),
        )
        .unwrap();

    assert!(handle.cancel());
    assert!(handle.is_canceled());
    assert!(matches!(handle.get_result(), Err(PoolError::Canceled)));

    pool.start();
    assert!(pool.wait_for_idle(Some(LONG)).unwrap());
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(*post.lock().unwrap(), Some(WorkItemState::Canceled));
    assert_eq!(handle.process_time(), Duration::ZERO);
    assert_eq!(pool.stats().canceled, 1);
    pool.shutdown();
}

#[test]
fn test_cancel_after_start_is_refused() {
    let pool = pool(1);
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    let handle = pool
        .submit(move |_ctx| {
            started_tx.send(()).unwrap();
            release_rx.recv_timeout(LONG).unwrap();
            Ok("finished")
        })
        .unwrap();

    started_rx.recv_timeout(LONG).unwrap();
    assert_eq!(handle.state(), WorkItemState::InProgress);
    assert!(!handle.cancel());

    release_tx.send(()).unwrap();
    assert_eq!(handle.get_result().unwrap(), "finished");
    assert!(handle.process_time() > Duration::ZERO);
    pool.shutdown();
}

#[test]
fn test_post_execute_policies() {
    let pool = pool(2);
    let fired = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for policy in [
        PostExecutePolicy::Always,
        PostExecutePolicy::WhenNotCanceled,
        PostExecutePolicy::WhenCanceled,
        PostExecutePolicy::Never,
    ] {
        let fired = Arc::clone(&fired);
        let options = WorkItemOptions::new()
            .with_post_execute(move |h| {
                assert!(h.is_completed());
                fired.fetch_add(1, Ordering::SeqCst);
            })
            .with_post_execute_policy(policy);
        handles.push(pool.submit_with(|_ctx| Ok(()), options).unwrap());
    }

    assert!(pool.wait_for_idle(Some(LONG)).unwrap());
    // Only Always and WhenNotCanceled fire for items that ran.
    assert_eq!(fired.load(Ordering::SeqCst), 2);
    pool.shutdown();
}

#[test]
fn test_pool_cancel_spares_later_submissions() {
    let pool = suspended_pool(2);
    let early: Vec<_> = (0..5).map(|i| pool.submit(move |_ctx| Ok(i)).unwrap()).collect();

    pool.cancel();
    let late = pool.submit(|_ctx| Ok(99)).unwrap();
    pool.start();

    for handle in &early {
        assert!(matches!(handle.get_result(), Err(PoolError::Canceled)));
    }
    assert_eq!(late.get_result_timeout(LONG).unwrap(), 99);
    pool.shutdown();
}

// ============================================================================
// FAULTS
// ============================================================================

#[test]
fn test_callback_error_is_captured() {
    let pool = pool(1);
    let handle = pool
        .submit(|_ctx| -> anyhow::Result<u32> { anyhow::bail!("bad input") })
        .unwrap();

    let err = handle.get_result().unwrap_err();
    assert!(err.fault().is_some());
    assert!(err.to_string().contains("bad input"));

    let (value, fault) = handle.get_result_with_fault(None, None).unwrap();
    assert_eq!(value, 0);
    assert!(fault.unwrap().to_string().contains("bad input"));
    pool.shutdown();
}

#[test]
fn test_panic_does_not_kill_worker() {
    let pool = pool(1);
    let panicking = pool
        .submit(|_ctx| -> anyhow::Result<()> { panic!("kaboom") })
        .unwrap();
    let err = panicking.get_result().unwrap_err();
    assert!(err.to_string().contains("kaboom"));

    let after = pool.submit(|_ctx| Ok(7)).unwrap();
    assert_eq!(after.get_result_timeout(LONG).unwrap(), 7);

    assert!(pool.wait_for_idle(Some(LONG)).unwrap());
    let stats = pool.stats();
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.faulted, 1);
    pool.shutdown();
}

// ============================================================================
// THREAD MANAGEMENT
// ============================================================================

#[test]
fn test_grows_to_max_and_retires_idle_threads() {
    let pool = pool(4);
    let (release_tx, release_rx) = crossbeam_channel::unbounded::<()>();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let release_rx = release_rx.clone();
            pool.submit(move |_ctx| {
                release_rx.recv_timeout(LONG).ok();
                Ok(())
            })
            .unwrap()
        })
        .collect();

    assert_eq!(pool.threads_alive(), 4);
    assert!(eventually(LONG, || pool.threads_in_use() == 4));

    for _ in 0..4 {
        release_tx.send(()).unwrap();
    }
    for handle in &handles {
        handle.get_result_timeout(LONG).unwrap();
    }
    assert!(eventually(LONG, || pool.threads_alive() == 0));
    assert_eq!(pool.stats().peak_threads, 4);
    pool.shutdown();
}

#[test]
fn test_thread_bounds_can_change() {
    let pool = pool(4);
    assert!(matches!(pool.set_max_threads(0), Err(PoolError::InvalidConfig(_))));
    assert!(matches!(pool.set_min_threads(5), Err(PoolError::InvalidConfig(_))));

    pool.set_min_threads(2).unwrap();
    assert_eq!(pool.threads_alive(), 2);
    assert!(matches!(pool.set_max_threads(1), Err(PoolError::InvalidConfig(_))));

    pool.set_max_threads(8).unwrap();
    assert_eq!(pool.max_threads(), 8);
    assert_eq!(pool.concurrency(), 8);

    // Minimum threads survive the idle timeout.
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(pool.threads_alive(), 2);
    pool.shutdown();
}

#[test]
fn test_worker_hooks_fire() {
    let started = Arc::new(AtomicUsize::new(0));
    let exited = Arc::new(AtomicUsize::new(0));
    let names = Arc::new(Mutex::new(Vec::new()));

    let hooks = {
        let started = Arc::clone(&started);
        let exited = Arc::clone(&exited);
        let names = Arc::clone(&names);
        WorkerHooks::new()
            .on_thread_start(move |info| {
                started.fetch_add(1, Ordering::SeqCst);
                names.lock().unwrap().push(info.pool_name.clone());
            })
            .on_thread_start(|_| panic!("hook failure is contained"))
            .on_thread_exit(move |_| {
                exited.fetch_add(1, Ordering::SeqCst);
            })
    };
    let pool = ThreadPool::with_hooks(
        PoolConfig::new()
            .with_name("hooked")
            .with_min_threads(2)
            .with_max_threads(2),
        hooks,
    )
    .unwrap();

    assert!(eventually(LONG, || started.load(Ordering::SeqCst) == 2));
    assert_eq!(pool.submit(|_ctx| Ok(1)).unwrap().get_result().unwrap(), 1);

    let report = pool.shutdown();
    assert_eq!(report.joined, 2);
    assert_eq!(report.detached, 0);
    assert_eq!(exited.load(Ordering::SeqCst), 2);
    assert!(names.lock().unwrap().iter().all(|n| n == "hooked"));
}

#[test]
fn test_shutdown_joins_every_idle_worker() {
    for round in 0..50 {
        let exited = Arc::new(AtomicUsize::new(0));
        let hooks = {
            let exited = Arc::clone(&exited);
            WorkerHooks::new().on_thread_exit(move |_| {
                exited.fetch_add(1, Ordering::SeqCst);
            })
        };
        let pool = ThreadPool::with_hooks(
            PoolConfig::new()
                .with_name("joined")
                .with_min_threads(4)
                .with_max_threads(4),
            hooks,
        )
        .unwrap();
        assert_eq!(pool.submit(move |_ctx| Ok(round)).unwrap().get_result().unwrap(), round);

        let report = pool.shutdown();
        assert_eq!(report.joined, 4, "round {round}: {report:?}");
        assert_eq!(report.detached, 0, "round {round}: {report:?}");
        assert_eq!(exited.load(Ordering::SeqCst), 4, "round {round}");
        assert_eq!(pool.threads_alive(), 0);
    }
}

// ============================================================================
// CONTEXT AND STATISTICS
// ============================================================================

thread_local! {
    static REQUEST_ID: RefCell<Option<String>> = const { RefCell::new(None) };
}

struct RequestIdCapture;

struct RequestIdSnapshot(Option<String>);

impl ContextCapture for RequestIdCapture {
    fn snapshot(&self) -> Box<dyn ContextSnapshot> {
        Box::new(RequestIdSnapshot(REQUEST_ID.with(|id| id.borrow().clone())))
    }
}

impl ContextSnapshot for RequestIdSnapshot {
    fn restore(self: Box<Self>) {
        REQUEST_ID.with(|id| *id.borrow_mut() = self.0);
    }
}

#[test]
fn test_context_is_propagated_to_worker() {
    let pool = pool(1);
    REQUEST_ID.with(|id| *id.borrow_mut() = Some("req-42".into()));

    let handle = pool
        .submit_with(
            |_ctx| Ok(REQUEST_ID.with(|id| id.borrow().clone())),
            WorkItemOptions::new().with_context(Arc::new(RequestIdCapture)),
        )
        .unwrap();

    assert_eq!(handle.get_result().unwrap().as_deref(), Some("req-42"));
    pool.shutdown();
}

#[test]
fn test_stats_snapshot() {
    let pool = pool(2);
    for i in 0..5 {
        pool.submit(move |_ctx| Ok(i)).unwrap();
    }
    pool.submit(|_ctx| -> anyhow::Result<i32> { anyhow::bail!("nope") })
        .unwrap();
    assert!(pool.wait_for_idle(Some(LONG)).unwrap());

    let stats = pool.stats();
    assert_eq!(stats.name, "it-pool");
    assert_eq!(stats.submitted, 6);
    assert_eq!(stats.completed, 6);
    assert_eq!(stats.faulted, 1);
    assert_eq!(stats.pending_items, 0);
    assert_eq!(stats.queued_items, 0);
    assert!(stats.peak_threads >= 1 && stats.peak_threads <= 2);

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["submitted"], 6);
    pool.shutdown();
}

// ============================================================================
// SHUTDOWN
// ============================================================================

#[test]
fn test_shutdown_cancels_queued_and_rejects_new_work() {
    let pool = suspended_pool(2);
    let queued: Vec<_> = (0..3).map(|i| pool.submit(move |_ctx| Ok(i)).unwrap()).collect();

    let report = pool.shutdown();
    assert_eq!(report.joined, 0);
    assert!(pool.is_shut_down());

    for handle in &queued {
        assert_eq!(handle.state(), WorkItemState::Canceled);
    }
    assert!(matches!(
        pool.submit(|_ctx| Ok(())),
        Err(PoolError::ShuttingDown)
    ));
    assert!(pool.is_idle());
    // Second shutdown is a no-op.
    assert_eq!(pool.shutdown().joined, 0);
}

#[test]
fn test_shutdown_timeout_detaches_busy_worker() {
    let pool = pool(1);
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    let handle = pool
        .submit(move |_ctx| {
            started_tx.send(()).unwrap();
            release_rx.recv_timeout(LONG).ok();
            Ok(1)
        })
        .unwrap();
    started_rx.recv_timeout(LONG).unwrap();

    let report = pool.shutdown_timeout(Duration::from_millis(50));
    assert_eq!(report.joined, 0);
    assert_eq!(report.detached, 1);

    // The detached worker still finishes its item.
    release_tx.send(()).unwrap();
    assert_eq!(handle.get_result_timeout(LONG).unwrap(), 1);
}

#[test]
fn test_wait_for_idle_from_worker_is_deadlock() {
    let pool = Arc::new(pool(2));
    let inner_pool = Arc::clone(&pool);
    let handle = pool
        .submit(move |_ctx| Ok(inner_pool.wait_for_idle(Some(Duration::ZERO))))
        .unwrap();

    let result = handle.get_result().unwrap();
    assert!(matches!(result, Err(PoolError::Deadlock(_))));
    pool.shutdown();
}
