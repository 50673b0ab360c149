//! Work items groups: bounded virtual sub-pools on top of a [`ThreadPool`](super::ThreadPool).
//!
//! A group keeps its own priority queue and forwards at most `concurrency`
//! items to the pool at a time. Each completion pulls the next item.
//! Canceling a group flips the cancellation flag shared by everything it has
//! queued and installs a fresh flag, so later submissions are unaffected.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::error::{AppResult, PanicFault, PoolError};
use super::result::WorkItemHandle;
use super::scheduler::WorkScheduler;
use super::thread_pool::PoolInner;
use super::wait_handle::WaitHandle;
use super::work_item::{
    CancelFlag, Completion, GroupLink, QueuedWorkItem, SharedWorkItem, WorkItem,
    WorkItemContext, WorkItemOptions, WorkItemParams,
};
use crate::config::GroupConfig;
use crate::infra::queue::PriorityQueue;
use crate::util::serde::{PostExecutePolicy, Priority};

/// Pool-unique group identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub(crate) u64);

impl GroupId {
    /// Numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "group-{}", self.0)
    }
}

/// Callback fired each time a group becomes idle.
pub type IdleCallback = Arc<dyn Fn(&WorkItemsGroup) + Send + Sync + 'static>;

struct GroupState {
    concurrency: usize,
    pending: PriorityQueue<SharedWorkItem>,
    /// Items of the current epoch occupying the pool.
    forwarded: usize,
    /// Items of canceled epochs still in the pool.
    stale: usize,
    epoch: u64,
    cancel_flag: CancelFlag,
    suspended: bool,
    /// Whether the pool's active-group set holds this group.
    registered: bool,
}

impl GroupState {
    /// Pop items to forward while a concurrency slot is free.
    fn take_forwardable(&mut self) -> Vec<SharedWorkItem> {
        let mut batch = Vec::new();
        while !self.suspended && self.forwarded < self.concurrency {
            let Some(item) = self.pending.dequeue() else {
                break;
            };
            self.forwarded += 1;
            batch.push(item);
        }
        batch
    }

    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.forwarded == 0 && self.stale == 0
    }

    /// Account for one forwarded item leaving the pool.
    fn finish(&mut self, epoch: u64) {
        if epoch == self.epoch {
            self.forwarded = self.forwarded.saturating_sub(1);
        } else {
            self.stale = self.stale.saturating_sub(1);
        }
    }
}

pub(crate) struct GroupInner {
    id: GroupId,
    name: Arc<str>,
    pool: Arc<PoolInner>,
    default_priority: Priority,
    default_policy: PostExecutePolicy,
    state: Mutex<GroupState>,
    idle: WaitHandle,
    on_idle: Mutex<Vec<IdleCallback>>,
}

impl GroupInner {
    pub(crate) const fn id(&self) -> GroupId {
        self.id
    }

    /// Called by a worker (or on shutdown) when a forwarded item is done.
    pub(crate) fn item_completed(self: &Arc<Self>, epoch: u64) {
        let (batch, became_idle) = {
            let mut state = self.state.lock();
            state.finish(epoch);
            let batch = state.take_forwardable();
            let idle = self.settle_idle(&mut state);
            (batch, idle)
        };
        self.forward(batch);
        if became_idle {
            self.fire_idle();
        }
    }

    /// Cancel the current epoch: queued and not-yet-running items are
    /// canceled, new submissions are not.
    pub(crate) fn cancel(self: &Arc<Self>) {
        let (drained, became_idle) = {
            let mut state = self.state.lock();
            state.cancel_flag.cancel();
            state.cancel_flag = CancelFlag::new();
            state.epoch += 1;
            state.stale += state.forwarded;
            state.forwarded = 0;
            let drained = state.pending.drain();
            let idle = self.settle_idle(&mut state);
            (drained, idle)
        };

        debug!(group = %self.name, canceled = drained.len(), "group canceled");
        for item in drained {
            Arc::clone(&item).discard();
            self.pool.record_completion(item.completion());
        }
        if became_idle {
            self.fire_idle();
        }
    }

    /// Set the idle signal and leave the pool's active set once nothing is
    /// pending. Returns whether the group just became idle.
    fn settle_idle(&self, state: &mut GroupState) -> bool {
        if !state.is_idle() {
            return false;
        }
        let was_registered = std::mem::replace(&mut state.registered, false);
        if was_registered {
            self.pool.unregister_group(self.id);
        }
        let became_idle = !self.idle.is_set();
        self.idle.set();
        became_idle
    }

    /// Hand items to the pool, outside the group lock.
    fn forward(self: &Arc<Self>, batch: Vec<SharedWorkItem>) {
        let mut queue = std::collections::VecDeque::from(batch);
        while let Some(item) = queue.pop_front() {
            let Err(item) = self.pool.enqueue(item) else {
                continue;
            };
            // Pool is shut down; cancel instead of running.
            Arc::clone(&item).discard();
            self.pool.record_completion(item.completion());
            let epoch = item.group_link().map_or(0, |link| link.epoch);
            let (next, became_idle) = {
                let mut state = self.state.lock();
                state.finish(epoch);
                let next = state.take_forwardable();
                let idle = self.settle_idle(&mut state);
                (next, idle)
            };
            queue.extend(next);
            if became_idle {
                self.fire_idle();
            }
        }
    }

    fn fire_idle(self: &Arc<Self>) {
        let callbacks: Vec<IdleCallback> = self.on_idle.lock().clone();
        if callbacks.is_empty() {
            return;
        }
        let group = WorkItemsGroup {
            inner: Arc::clone(self),
        };
        for callback in callbacks {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(&group))) {
                warn!(
                    group = %self.name,
                    panic = %PanicFault::from_payload(payload.as_ref()),
                    "idle callback panicked"
                );
            }
        }
    }
}

/// A named virtual pool that caps how many of its items occupy pool threads.
///
/// Cloning yields another handle to the same group. Dropping every handle
/// does not cancel queued work; the group lives until its items finish.
#[derive(Clone)]
pub struct WorkItemsGroup {
    inner: Arc<GroupInner>,
}

impl std::fmt::Debug for WorkItemsGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItemsGroup")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("concurrency", &self.concurrency())
            .finish_non_exhaustive()
    }
}

impl WorkItemsGroup {
    pub(crate) fn new(pool: Arc<PoolInner>, config: GroupConfig) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;
        if pool.is_shut_down() {
            return Err(PoolError::ShuttingDown);
        }

        let id = pool.next_group_id();
        let name: Arc<str> = match &config.name {
            Some(name) => Arc::from(name.as_str()),
            None => Arc::from(format!("{}/{id}", pool.name())),
        };
        let inner = Arc::new(GroupInner {
            id,
            name: Arc::clone(&name),
            default_priority: config.default_priority.unwrap_or(pool.default_priority()),
            default_policy: config
                .default_post_execute_policy
                .unwrap_or(pool.default_policy()),
            pool,
            state: Mutex::new(GroupState {
                concurrency: config.concurrency,
                pending: PriorityQueue::new(),
                forwarded: 0,
                stale: 0,
                epoch: 0,
                cancel_flag: CancelFlag::new(),
                suspended: config.start_suspended,
                registered: false,
            }),
            idle: WaitHandle::with_state(true),
            on_idle: Mutex::new(Vec::new()),
        });

        info!(
            group = %name,
            concurrency = config.concurrency,
            suspended = config.start_suspended,
            "work items group created"
        );
        Ok(Self { inner })
    }

    /// Group identifier, unique within its pool.
    #[must_use]
    pub fn id(&self) -> GroupId {
        self.inner.id
    }

    /// Items submitted but not yet forwarded to the pool.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Items of the current epoch occupying the pool.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().forwarded
    }

    /// Whether the group was created suspended and not started yet.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.inner.state.lock().suspended
    }

    /// Change the concurrency limit. Raising it forwards pending items at once.
    ///
    /// # Errors
    ///
    /// [`PoolError::InvalidConfig`] for zero.
    pub fn set_concurrency(&self, concurrency: usize) -> Result<(), PoolError> {
        if concurrency == 0 {
            return Err(PoolError::InvalidConfig(
                "concurrency must be greater than 0".into(),
            ));
        }
        let batch = {
            let mut state = self.inner.state.lock();
            state.concurrency = concurrency;
            state.take_forwardable()
        };
        self.inner.forward(batch);
        Ok(())
    }

    /// Register a callback fired every time the group becomes idle.
    ///
    /// Callbacks run on the thread that completed the group's last item, one
    /// at a time; a panicking callback is logged and skipped.
    pub fn on_idle<F>(&self, callback: F)
    where
        F: Fn(&Self) + Send + Sync + 'static,
    {
        self.inner.on_idle.lock().push(Arc::new(callback));
    }

    /// Idle signal, set whenever nothing of this group is queued or running.
    #[must_use]
    pub fn idle_handle(&self) -> WaitHandle {
        self.inner.idle.clone()
    }

    /// Deadlock guard for waits on this group.
    pub(crate) fn ensure_not_member(&self) -> Result<(), PoolError> {
        if self.inner.pool.current_group() == Some(self.inner.id) {
            return Err(PoolError::Deadlock(format!(
                "wait_for_idle called from a work item of group `{}`",
                self.inner.name
            )));
        }
        Ok(())
    }
}

impl WorkScheduler for WorkItemsGroup {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn submit_with<T, F>(
        &self,
        job: F,
        options: WorkItemOptions<T>,
    ) -> Result<WorkItemHandle<T>, PoolError>
    where
        T: Send + 'static,
        F: FnOnce(&WorkItemContext) -> AppResult<T> + Send + 'static,
    {
        let inner = &self.inner;
        if inner.pool.is_shut_down() {
            return Err(PoolError::ShuttingDown);
        }

        let (cancel_flag, epoch) = {
            let state = inner.state.lock();
            (state.cancel_flag.clone(), state.epoch)
        };
        let priority = options.priority.unwrap_or(inner.default_priority);
        let item = WorkItem::new(
            Box::new(job),
            WorkItemParams {
                priority,
                policy: options.post_execute_policy.unwrap_or(inner.default_policy),
                post_execute: options.post_execute,
                context: options.context,
                cancel_flag,
                pool_name: Arc::clone(inner.pool.name()),
                group: Some(GroupLink {
                    group: Arc::downgrade(inner),
                    id: inner.id,
                    epoch,
                }),
            },
        );
        let handle = WorkItemHandle::new(Arc::clone(&item));

        let batch = {
            let mut state = inner.state.lock();
            if state.epoch != epoch {
                // Canceled while the item was being built; it belongs to the
                // canceled epoch.
                drop(state);
                item.discard();
                inner.pool.record_completion(Completion::Canceled);
                return Ok(handle);
            }
            state.pending.enqueue(priority, item);
            inner.idle.reset();
            if !state.registered {
                state.registered = true;
                inner.pool.register_group(Arc::clone(inner));
            }
            state.take_forwardable()
        };
        inner.forward(batch);
        debug!(group = %inner.name, %priority, "work item queued in group");
        Ok(handle)
    }

    fn wait_for_idle(&self, timeout: Option<Duration>) -> Result<bool, PoolError> {
        self.ensure_not_member()?;
        Ok(self.inner.idle.wait_timeout(timeout))
    }

    /// Cancel everything queued in this group. Items already running finish.
    fn cancel(&self) {
        self.inner.cancel();
    }

    fn start(&self) {
        let batch = {
            let mut state = self.inner.state.lock();
            if !state.suspended {
                return;
            }
            state.suspended = false;
            state.take_forwardable()
        };
        info!(group = %self.inner.name, forwarded = batch.len(), "work items group started");
        self.inner.forward(batch);
    }

    fn is_idle(&self) -> bool {
        self.inner.state.lock().is_idle()
    }

    fn concurrency(&self) -> usize {
        self.inner.state.lock().concurrency
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::core::ThreadPool;

    fn pool() -> ThreadPool {
        ThreadPool::new(PoolConfig::new().with_name("group-unit").with_max_threads(4)).unwrap()
    }

    #[test]
    fn test_group_state_accounting() {
        let mut state = GroupState {
            concurrency: 2,
            pending: PriorityQueue::new(),
            forwarded: 0,
            stale: 0,
            epoch: 0,
            cancel_flag: CancelFlag::new(),
            suspended: false,
            registered: false,
        };
        assert!(state.is_idle());

        // Two items forwarded in epoch 0, then the group is canceled.
        state.forwarded = 2;
        state.epoch = 1;
        state.stale = 2;
        state.forwarded = 0;
        assert!(!state.is_idle());

        state.finish(0);
        assert_eq!(state.stale, 1);
        state.finish(0);
        assert!(state.is_idle());
    }

    #[test]
    fn test_suspended_group_buffers_until_started() {
        let pool = pool();
        let group = pool
            .create_group(GroupConfig::new(2).with_start_suspended(true))
            .unwrap();

        let handles: Vec<_> = (0..3).map(|i| group.submit(move |_ctx| Ok(i)).unwrap()).collect();
        assert_eq!(group.pending_count(), 3);
        assert_eq!(group.in_flight(), 0);
        assert!(!group.is_idle());

        group.start();
        for (i, handle) in handles.iter().enumerate() {
            assert_eq!(handle.get_result().unwrap(), i);
        }
        assert!(group.wait_for_idle(Some(Duration::from_secs(5))).unwrap());
        pool.shutdown();
    }

    #[test]
    fn test_group_deadlock_guard() {
        let pool = pool();
        let group = pool.create_group(GroupConfig::new(1)).unwrap();
        let inner_group = group.clone();
        let handle = group
            .submit(move |_ctx| Ok(inner_group.wait_for_idle(Some(Duration::ZERO))))
            .unwrap();
        let err = handle.get_result().unwrap().unwrap_err();
        assert!(matches!(err, PoolError::Deadlock(_)));
        pool.shutdown();
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let pool = pool();
        assert!(matches!(
            pool.create_group(GroupConfig::new(0)),
            Err(PoolError::InvalidConfig(_))
        ));
        let group = pool.create_group(GroupConfig::new(1)).unwrap();
        assert!(group.set_concurrency(0).is_err());
        pool.shutdown();
    }
}
