//! Worker thread loop and thread lifecycle hooks.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{debug, warn};

use super::{PoolInner, WorkerSlot, NO_GROUP};
use crate::core::error::PanicFault;
use crate::core::work_item::SharedWorkItem;
use crate::util::serde::Priority;

/// Identity of a worker thread, passed to [`WorkerHooks`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    /// Name of the owning pool.
    pub pool_name: String,
    /// Pool-unique, monotonically assigned worker number.
    pub worker_id: usize,
}

/// Callback run on a worker thread when it starts or exits.
pub type WorkerHook = Arc<dyn Fn(&WorkerInfo) + Send + Sync + 'static>;

/// Thread start and exit callbacks.
///
/// Each callback runs on the worker thread itself. A panicking callback is
/// logged and does not prevent the others from running.
#[derive(Clone, Default)]
pub struct WorkerHooks {
    on_start: Vec<WorkerHook>,
    on_exit: Vec<WorkerHook>,
}

impl std::fmt::Debug for WorkerHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHooks")
            .field("on_start", &self.on_start.len())
            .field("on_exit", &self.on_exit.len())
            .finish()
    }
}

impl WorkerHooks {
    /// No hooks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a callback run when a worker thread starts.
    #[must_use]
    pub fn on_thread_start<F>(mut self, hook: F) -> Self
    where
        F: Fn(&WorkerInfo) + Send + Sync + 'static,
    {
        self.on_start.push(Arc::new(hook));
        self
    }

    /// Add a callback run when a worker thread exits.
    #[must_use]
    pub fn on_thread_exit<F>(mut self, hook: F) -> Self
    where
        F: Fn(&WorkerInfo) + Send + Sync + 'static,
    {
        self.on_exit.push(Arc::new(hook));
        self
    }

    fn fire(hooks: &[WorkerHook], info: &WorkerInfo, event: &str) {
        for hook in hooks {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| hook(info))) {
                warn!(
                    pool = %info.pool_name,
                    worker_id = info.worker_id,
                    event,
                    panic = %PanicFault::from_payload(payload.as_ref()),
                    "worker hook panicked"
                );
            }
        }
    }
}

impl WorkerSlot {
    fn enter(&self, group: u64) {
        self.current_group.store(group, Ordering::Release);
    }

    fn leave(&self) {
        self.current_group.store(NO_GROUP, Ordering::Release);
    }
}

/// OS priority for a configured level. The ends map to the platform's
/// minimum and maximum, the middle levels to the portable 0..=99 scale.
fn os_priority(level: Priority) -> Result<ThreadPriority, String> {
    match level {
        Priority::Lowest => Ok(ThreadPriority::Min),
        Priority::Highest => Ok(ThreadPriority::Max),
        other => ThreadPriorityValue::try_from(other.level() * 25)
            .map(ThreadPriority::Crossplatform)
            .map_err(|err| format!("{err:?}")),
    }
}

/// Apply the pool's thread priority to the calling worker, if one is set.
/// A refusal (missing privileges, unsupported platform) leaves the inherited
/// priority in place.
fn apply_thread_priority(pool: &PoolInner, worker_id: usize) {
    let Some(level) = pool.thread_priority else {
        return;
    };
    let applied = os_priority(level)
        .and_then(|priority| set_current_thread_priority(priority).map_err(|err| format!("{err:?}")));
    match applied {
        Ok(()) => debug!(pool = %pool.name, worker_id, priority = %level, "worker thread priority set"),
        Err(error) => warn!(
            pool = %pool.name,
            worker_id,
            priority = %level,
            %error,
            "could not set worker thread priority; keeping inherited priority"
        ),
    }
}

/// Worker thread body.
pub(super) fn run(pool: &Arc<PoolInner>, worker_id: usize, slot: &WorkerSlot) {
    let thread_id = thread::current().id();
    let info = WorkerInfo {
        pool_name: pool.name.to_string(),
        worker_id,
    };
    apply_thread_priority(pool, worker_id);
    WorkerHooks::fire(&pool.hooks.on_start, &info, "start");
    debug!(pool = %pool.name, worker_id, "worker thread started");

    // Blocking dequeue with the idle timeout; a timeout is the cue to retire.
    loop {
        if pool.is_shut_down() {
            break;
        }
        let Some(item) = pool.queue.dequeue(pool.idle_timeout) else {
            if pool.is_shut_down() {
                break;
            }
            if pool.try_retire(thread_id, true) {
                debug!(pool = %pool.name, worker_id, "idle worker retiring");
                break;
            }
            continue;
        };

        run_item(pool, slot, &item);

        if pool.try_retire(thread_id, false) {
            debug!(pool = %pool.name, worker_id, "worker above max_threads retiring");
            break;
        }
    }

    pool.forget_worker(thread_id);
    WorkerHooks::fire(&pool.hooks.on_exit, &info, "exit");
    debug!(pool = %pool.name, worker_id, "worker thread exiting");
    // Retired workers are not joined; only shutdown listens for exits.
    if pool.is_shut_down() {
        // Nobody listens once shutdown has timed out.
        let _ = pool.exit_tx.send(thread_id);
    }
}

/// Execute one dequeued item and propagate its completion.
///
/// Group completion is reported before the pool's pending count drops, so a
/// group forwarding its next item keeps the pool from looking idle.
fn run_item(pool: &PoolInner, slot: &WorkerSlot, item: &SharedWorkItem) {
    let link = item.group_link();
    if let Some(link) = link {
        slot.enter(link.id.0);
    }

    if item.starting() {
        Arc::clone(item).execute();
    }

    slot.leave();
    pool.queue.done();
    pool.record_completion(item.completion());

    if let Some(link) = link {
        if let Some(group) = link.group.upgrade() {
            group.item_completed(link.epoch);
        }
    }
    pool.item_done();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_priority_mapping() {
        assert!(matches!(os_priority(Priority::Lowest), Ok(ThreadPriority::Min)));
        assert!(matches!(os_priority(Priority::Highest), Ok(ThreadPriority::Max)));
        for level in [Priority::BelowNormal, Priority::Normal, Priority::AboveNormal] {
            assert!(matches!(
                os_priority(level),
                Ok(ThreadPriority::Crossplatform(_))
            ));
        }
    }
}
