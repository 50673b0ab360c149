//! Integration tests for WorkItemsGroup
//!
//! Covers the concurrency cap, epoch cancellation, suspension, idle
//! notification and interaction with pool shutdown.

use prometheus_thread_pool::config::{GroupConfig, PoolConfig};
use prometheus_thread_pool::core::{
    PoolError, ThreadPool, WorkItemOptions, WorkItemState, WorkScheduler,
};
use prometheus_thread_pool::util::serde::{PostExecutePolicy, Priority};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

const LONG: Duration = Duration::from_secs(10);

fn pool(max_threads: usize) -> ThreadPool {
    ThreadPool::new(
        PoolConfig::new()
            .with_name("group-it")
            .with_max_threads(max_threads),
    )
    .unwrap()
}

/// Tracks how many callbacks run at once and the highest value observed.
#[derive(Default)]
struct ConcurrencyProbe {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyProbe {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[test]
fn test_group_never_exceeds_concurrency() {
    let pool = pool(8);
    let group = pool
        .create_group(GroupConfig::new(3).with_name("capped"))
        .unwrap();
    let probe = Arc::new(ConcurrencyProbe::default());

    let handles: Vec<_> = (0..30)
        .map(|i| {
            let probe = Arc::clone(&probe);
            group
                .submit(move |ctx| {
                    probe.enter();
                    std::thread::sleep(Duration::from_millis(5));
                    probe.leave();
                    Ok((i, ctx.group_id()))
                })
                .unwrap()
        })
        .collect();

    for (i, handle) in handles.iter().enumerate() {
        let (value, group_id) = handle.get_result_timeout(LONG).unwrap();
        assert_eq!(value, i);
        assert_eq!(group_id, Some(group.id()));
    }
    let peak = probe.peak.load(Ordering::SeqCst);
    assert!(peak >= 1 && peak <= 3, "peak concurrency was {peak}");
    assert!(group.wait_for_idle(Some(LONG)).unwrap());
    assert!(group.is_idle());
    assert_eq!(group.name(), "capped");
    pool.shutdown();
}

#[test]
fn test_two_of_five_long_items_in_progress() {
    let pool = pool(8);
    let group = pool.create_group(GroupConfig::new(2)).unwrap();
    let (release_tx, release_rx) = crossbeam_channel::unbounded::<()>();

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let release_rx = release_rx.clone();
            group
                .submit(move |_ctx| {
                    release_rx.recv_timeout(LONG).ok();
                    Ok(())
                })
                .unwrap()
        })
        .collect();
    let in_progress = || {
        handles
            .iter()
            .filter(|h| h.state() == WorkItemState::InProgress)
            .count()
    };

    // Sample while at least two items remain queued.
    for released in 0..3 {
        let deadline = std::time::Instant::now() + LONG;
        while in_progress() < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(in_progress(), 2, "after {released} releases");
        assert_eq!(group.pending_count(), 3 - released);
        release_tx.send(()).unwrap();
        let deadline = std::time::Instant::now() + LONG;
        while handles.iter().filter(|h| h.is_completed()).count() <= released
            && std::time::Instant::now() < deadline
        {
            std::thread::sleep(Duration::from_millis(2));
        }
    }
    for _ in 0..2 {
        release_tx.send(()).unwrap();
    }
    for handle in &handles {
        handle.get_result_timeout(LONG).unwrap();
    }
    pool.shutdown();
}

#[test]
fn test_groups_share_pool_independently() {
    let pool = pool(4);
    let a = pool.create_group(GroupConfig::new(1)).unwrap();
    let b = pool.create_group(GroupConfig::new(2)).unwrap();
    assert_ne!(a.id(), b.id());
    assert_eq!(a.concurrency(), 1);
    assert_eq!(b.concurrency(), 2);

    let probe_a = Arc::new(ConcurrencyProbe::default());
    let mut handles = Vec::new();
    for _ in 0..10 {
        let probe = Arc::clone(&probe_a);
        handles.push(
            a.submit(move |_ctx| {
                probe.enter();
                std::thread::sleep(Duration::from_millis(2));
                probe.leave();
                Ok(())
            })
            .unwrap(),
        );
        handles.push(b.submit(|_ctx| Ok(())).unwrap());
    }
    for handle in &handles {
        handle.get_result_timeout(LONG).unwrap();
    }
    assert_eq!(probe_a.peak.load(Ordering::SeqCst), 1);
    pool.shutdown();
}

#[test]
fn test_group_respects_item_priority() {
    let pool = pool(2);
    let group = pool
        .create_group(GroupConfig::new(1).with_start_suspended(true))
        .unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    for (label, priority) in [
        ("low", Priority::Lowest),
        ("normal", Priority::Normal),
        ("high", Priority::Highest),
    ] {
        let order = Arc::clone(&order);
        group
            .submit_with_priority(
                move |_ctx| {
                    order.lock().unwrap().push(label);
                    Ok(())
                },
                priority,
            )
            .unwrap();
    }
    assert!(group.is_suspended());
    group.start();
    assert!(group.wait_for_idle(Some(LONG)).unwrap());
    assert_eq!(*order.lock().unwrap(), vec!["high", "normal", "low"]);
    pool.shutdown();
}

#[test]
fn test_raising_concurrency_forwards_pending() {
    let pool = pool(4);
    let group = pool.create_group(GroupConfig::new(1)).unwrap();
    let (release_tx, release_rx) = crossbeam_channel::unbounded::<()>();
    let probe = Arc::new(ConcurrencyProbe::default());

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let release_rx = release_rx.clone();
            let probe = Arc::clone(&probe);
            group
                .submit(move |_ctx| {
                    probe.enter();
                    release_rx.recv_timeout(LONG).ok();
                    probe.leave();
                    Ok(())
                })
                .unwrap()
        })
        .collect();
    assert_eq!(group.pending_count(), 2);
    assert_eq!(group.in_flight(), 1);

    group.set_concurrency(3).unwrap();
    assert_eq!(group.pending_count(), 0);
    assert_eq!(group.in_flight(), 3);

    for _ in 0..3 {
        release_tx.send(()).unwrap();
    }
    for handle in &handles {
        handle.get_result_timeout(LONG).unwrap();
    }
    pool.shutdown();
}

// ============================================================================
// CANCELLATION
// ============================================================================

#[test]
fn test_group_cancel_only_affects_earlier_items() {
    let pool = pool(4);
    let group = pool.create_group(GroupConfig::new(1)).unwrap();
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    let running = group
        .submit(move |_ctx| {
            started_tx.send(()).unwrap();
            release_rx.recv_timeout(LONG).ok();
            Ok("running")
        })
        .unwrap();
    started_rx.recv_timeout(LONG).unwrap();

    let queued: Vec<_> = (0..5).map(|_| group.submit(|_ctx| Ok("queued")).unwrap()).collect();
    assert_eq!(group.pending_count(), 5);

    group.cancel();
    assert_eq!(group.pending_count(), 0);
    for handle in &queued {
        assert_eq!(handle.state(), WorkItemState::Canceled);
        assert!(matches!(handle.get_result(), Err(PoolError::Canceled)));
    }

    // Submitted after the cancel: belongs to the new epoch and runs.
    let later = group.submit(|_ctx| Ok("later")).unwrap();
    assert_eq!(later.get_result_timeout(LONG).unwrap(), "later");

    // The running item was not interrupted.
    assert!(!group.is_idle());
    release_tx.send(()).unwrap();
    assert_eq!(running.get_result_timeout(LONG).unwrap(), "running");
    assert!(group.wait_for_idle(Some(LONG)).unwrap());
    pool.shutdown();
}

#[test]
fn test_group_cancel_fires_post_execute_for_canceled() {
    let pool = pool(2);
    let group = pool
        .create_group(
            GroupConfig::new(1)
                .with_start_suspended(true)
                .with_post_execute_policy(PostExecutePolicy::WhenCanceled),
        )
        .unwrap();
    let fired = Arc::new(AtomicUsize::new(0));

    for _ in 0..4 {
        let fired = Arc::clone(&fired);
        group
            .submit_with(
                |_ctx| Ok(()),
                WorkItemOptions::new().with_post_execute(move |h| {
                    assert!(h.is_canceled());
                    fired.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
    }
    group.cancel();
    assert_eq!(fired.load(Ordering::SeqCst), 4);
    assert!(group.is_idle());
    pool.shutdown();
}

#[test]
fn test_pool_cancel_reaches_groups() {
    let pool = pool(2);
    let group = pool
        .create_group(GroupConfig::new(1).with_start_suspended(true))
        .unwrap();
    let handles: Vec<_> = (0..3).map(|i| group.submit(move |_ctx| Ok(i)).unwrap()).collect();
    assert_eq!(pool.stats().active_groups, 1);

    pool.cancel();
    for handle in &handles {
        assert!(handle.is_canceled());
    }
    assert!(group.is_idle());
    assert_eq!(pool.stats().active_groups, 0);
    pool.shutdown();
}

// ============================================================================
// IDLE NOTIFICATION AND SHUTDOWN
// ============================================================================

#[test]
fn test_on_idle_fires_when_group_drains() {
    let pool = pool(2);
    let group = pool.create_group(GroupConfig::new(2)).unwrap();
    let (idle_tx, idle_rx) = mpsc::channel();
    let idle_tx = Mutex::new(idle_tx);
    group.on_idle(move |g| {
        idle_tx.lock().unwrap().send(g.id()).ok();
    });

    let handles: Vec<_> = (0..4)
        .map(|i| {
            group
                .submit(move |_ctx| {
                    std::thread::sleep(Duration::from_millis(5));
                    Ok(i)
                })
                .unwrap()
        })
        .collect();
    for handle in &handles {
        handle.get_result_timeout(LONG).unwrap();
    }

    assert_eq!(idle_rx.recv_timeout(LONG).unwrap(), group.id());
    assert!(group.wait_for_idle(Some(LONG)).unwrap());
    assert!(group.idle_handle().is_set());
    pool.shutdown();
}

#[test]
fn test_group_rejects_work_after_pool_shutdown() {
    let pool = pool(2);
    let group = pool
        .create_group(GroupConfig::new(1).with_start_suspended(true))
        .unwrap();
    let queued = group.submit(|_ctx| Ok(1)).unwrap();

    pool.shutdown();
    assert!(queued.is_canceled());
    assert!(matches!(group.submit(|_ctx| Ok(2)), Err(PoolError::ShuttingDown)));
    assert!(matches!(
        pool.create_group(GroupConfig::new(1)),
        Err(PoolError::ShuttingDown)
    ));
}
