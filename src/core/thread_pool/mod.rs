//! Thread pool with a dynamic number of OS worker threads.
//!
//! Workers block on a shared [`BlockingQueue`] ordered by priority. The pool
//! grows by one thread whenever queued plus running items outnumber the live
//! threads (up to `max_worker_threads`), and a worker retires after sitting
//! idle for `idle_timeout_ms` while the pool is above `min_worker_threads`.
//!
//! # Example
//!
//! ```rust,no_run
//! use prometheus_thread_pool::config::PoolConfig;
//! use prometheus_thread_pool::core::{ThreadPool, WorkScheduler};
//!
//! let pool = ThreadPool::new(PoolConfig::new().with_max_threads(4))?;
//! let handle = pool.submit(|_ctx| Ok(6 * 7))?;
//! assert_eq!(handle.get_result()?, 42);
//! pool.shutdown();
//! # Ok::<(), prometheus_thread_pool::core::PoolError>(())
//! ```

mod worker;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::error::{AppResult, PoolError};
use super::group::{GroupId, GroupInner, WorkItemsGroup};
use super::result::WorkItemHandle;
use super::scheduler::WorkScheduler;
use super::wait_handle::{deadline_after, WaitHandle};
use super::work_item::{
    CancelFlag, Completion, SharedWorkItem, WorkItem, WorkItemContext, WorkItemOptions,
    WorkItemParams,
};
use crate::config::{GroupConfig, PoolConfig};
use crate::infra::queue::BlockingQueue;
use crate::util::serde::{PostExecutePolicy, Priority};

pub use worker::{WorkerHook, WorkerHooks, WorkerInfo};

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Pool name.
    pub name: String,
    /// Live worker threads.
    pub threads_alive: usize,
    /// Worker threads currently running an item.
    pub threads_in_use: usize,
    /// Most worker threads ever alive at once.
    pub peak_threads: usize,
    /// Configured lower bound.
    pub min_threads: usize,
    /// Configured upper bound.
    pub max_threads: usize,
    /// Items waiting in the pool queue.
    pub queued_items: usize,
    /// Items queued or running.
    pub pending_items: usize,
    /// Groups with outstanding work.
    pub active_groups: usize,
    /// Items accepted into the pool queue.
    pub submitted: u64,
    /// Items whose callback ran (including faulted ones).
    pub completed: u64,
    /// Items whose callback returned an error or panicked.
    pub faulted: u64,
    /// Items canceled before they ran.
    pub canceled: u64,
}

/// Outcome of [`ThreadPool::shutdown_timeout`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Worker threads that exited and were joined.
    pub joined: usize,
    /// Worker threads still running at the deadline. They are no longer
    /// tracked and finish (or leak) on their own.
    pub detached: usize,
}

/// Internal counters for pool statistics (lock-free atomics).
#[derive(Debug, Default)]
struct PoolCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    faulted: AtomicU64,
    canceled: AtomicU64,
    peak_threads: AtomicUsize,
}

impl PoolCounters {
    fn record(&self, completion: Completion) {
        match completion {
            Completion::Succeeded => {
                self.completed.fetch_add(1, Ordering::Relaxed);
            }
            Completion::Faulted => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                self.faulted.fetch_add(1, Ordering::Relaxed);
            }
            Completion::Canceled => {
                self.canceled.fetch_add(1, Ordering::Relaxed);
            }
            Completion::Unfinished => {}
        }
    }
}

const NO_GROUP: u64 = 0;

/// Per-worker state visible to other threads.
#[derive(Debug, Default)]
pub(crate) struct WorkerSlot {
    /// Group of the item being executed, or `NO_GROUP`.
    current_group: AtomicU64,
}

struct WorkerEntry {
    worker_id: usize,
    handle: JoinHandle<()>,
    slot: Arc<WorkerSlot>,
}

/// State shared by the pool handle, its workers and its groups.
pub(crate) struct PoolInner {
    name: Arc<str>,
    thread_name_prefix: String,
    stack_size: Option<usize>,
    thread_priority: Option<Priority>,
    idle_timeout: Duration,
    default_priority: Priority,
    default_policy: PostExecutePolicy,
    queue: BlockingQueue<SharedWorkItem>,
    workers: Mutex<HashMap<ThreadId, WorkerEntry>>,
    /// Mirrors `workers.len()` for lock-free reads.
    alive: AtomicUsize,
    min_threads: AtomicUsize,
    max_threads: AtomicUsize,
    /// Items queued or running. Updated atomically; only transitions to and
    /// from zero take `idle_sync` to bring `idle` in line with it.
    pending: AtomicUsize,
    idle_sync: Mutex<()>,
    idle: WaitHandle,
    shutdown: AtomicBool,
    suspended: AtomicBool,
    cancel_flag: Mutex<CancelFlag>,
    groups: Mutex<HashMap<GroupId, Arc<GroupInner>>>,
    next_group_id: AtomicU64,
    next_worker_id: AtomicUsize,
    counters: PoolCounters,
    hooks: WorkerHooks,
    exit_tx: Sender<ThreadId>,
    exit_rx: Receiver<ThreadId>,
}

impl PoolInner {
    pub(crate) fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub(crate) const fn default_priority(&self) -> Priority {
        self.default_priority
    }

    pub(crate) const fn default_policy(&self) -> PostExecutePolicy {
        self.default_policy
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn current_cancel_flag(&self) -> CancelFlag {
        self.cancel_flag.lock().clone()
    }

    pub(crate) fn next_group_id(&self) -> GroupId {
        GroupId(self.next_group_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn register_group(&self, group: Arc<GroupInner>) {
        self.groups.lock().insert(group.id(), group);
    }

    pub(crate) fn unregister_group(&self, id: GroupId) {
        self.groups.lock().remove(&id);
    }

    pub(crate) fn record_completion(&self, completion: Completion) {
        self.counters.record(completion);
    }

    fn item_added(&self) {
        if self.pending.fetch_add(1, Ordering::AcqRel) == 0 {
            self.sync_idle();
        }
    }

    fn item_done(&self) {
        let previous = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if previous == Ok(1) {
            self.sync_idle();
        }
    }

    /// Re-read `pending` under the lock so racing edges settle on its latest value.
    fn sync_idle(&self) {
        let _guard = self.idle_sync.lock();
        if self.pending.load(Ordering::Acquire) == 0 {
            self.idle.set();
        } else {
            self.idle.reset();
        }
    }

    fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Push an item onto the pool queue, growing the pool if needed.
    ///
    /// Hands the item back if the pool has been shut down.
    pub(crate) fn enqueue(self: &Arc<Self>, item: SharedWorkItem) -> Result<(), SharedWorkItem> {
        self.item_added();
        if let Err(item) = self.queue.enqueue(item.priority(), item) {
            self.item_done();
            return Err(item);
        }
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.maybe_grow();
        Ok(())
    }

    /// Cancel an item that was queued but will never run, and account for it.
    fn abandon(&self, item: SharedWorkItem) {
        Arc::clone(&item).discard();
        self.record_completion(item.completion());
        if let Some(link) = item.group_link() {
            if let Some(group) = link.group.upgrade() {
                group.item_completed(link.epoch);
            }
        }
        self.item_done();
    }

    fn maybe_grow(self: &Arc<Self>) {
        if self.suspended.load(Ordering::Acquire) || self.is_shut_down() {
            return;
        }
        let mut workers = self.workers.lock();
        if self.is_shut_down() {
            return;
        }
        let alive = workers.len();
        let busy = self.queue.load();
        if busy > alive && alive < self.max_threads.load(Ordering::Acquire) {
            if let Err(err) = self.spawn_worker(&mut workers) {
                error!(pool = %self.name, error = %err, "failed to grow thread pool");
            }
        }
    }

    /// Spawn workers until at least `target` are alive (capped at the maximum).
    fn ensure_threads(self: &Arc<Self>, target: usize) -> Result<(), PoolError> {
        let mut workers = self.workers.lock();
        if self.is_shut_down() {
            return Ok(());
        }
        let target = target.min(self.max_threads.load(Ordering::Acquire));
        while workers.len() < target {
            self.spawn_worker(&mut workers)?;
        }
        Ok(())
    }

    fn spawn_worker(
        self: &Arc<Self>,
        workers: &mut HashMap<ThreadId, WorkerEntry>,
    ) -> Result<(), PoolError> {
        let worker_id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(WorkerSlot::default());

        let mut builder =
            thread::Builder::new().name(format!("{}-{worker_id}", self.thread_name_prefix));
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }
        let pool = Arc::clone(self);
        let worker_slot = Arc::clone(&slot);
        let handle = builder
            .spawn(move || worker::run(&pool, worker_id, &worker_slot))
            .map_err(|e| PoolError::Spawn(e.to_string()))?;

        workers.insert(
            handle.thread().id(),
            WorkerEntry {
                worker_id,
                handle,
                slot,
            },
        );
        let alive = workers.len();
        self.alive.store(alive, Ordering::Release);
        self.counters.peak_threads.fetch_max(alive, Ordering::Relaxed);
        debug!(pool = %self.name, worker_id, alive, "worker thread spawned");
        Ok(())
    }

    /// Decide under the registry lock whether the calling worker retires.
    ///
    /// An idle worker retires while the pool is above its minimum and the
    /// queue is empty; a busy one only while the pool is above its maximum.
    fn try_retire(&self, thread_id: ThreadId, idle: bool) -> bool {
        if !idle
            && self.alive.load(Ordering::Acquire) <= self.max_threads.load(Ordering::Acquire)
        {
            return false;
        }
        let mut workers = self.workers.lock();
        let alive = workers.len();
        let retire = if idle {
            alive > self.min_threads.load(Ordering::Acquire) && self.queue.is_empty()
        } else {
            alive > self.max_threads.load(Ordering::Acquire)
        };
        if retire && workers.remove(&thread_id).is_some() {
            self.alive.store(workers.len(), Ordering::Release);
            return true;
        }
        false
    }

    fn forget_worker(&self, thread_id: ThreadId) {
        let mut workers = self.workers.lock();
        if workers.remove(&thread_id).is_some() {
            self.alive.store(workers.len(), Ordering::Release);
        }
    }

    fn worker_slot(&self, thread_id: ThreadId) -> Option<Arc<WorkerSlot>> {
        self.workers
            .lock()
            .get(&thread_id)
            .map(|entry| Arc::clone(&entry.slot))
    }

    /// Group of the item the calling thread is executing, if it is one of
    /// this pool's workers.
    pub(crate) fn current_group(&self) -> Option<GroupId> {
        let slot = self.worker_slot(thread::current().id())?;
        match slot.current_group.load(Ordering::Acquire) {
            NO_GROUP => None,
            id => Some(GroupId(id)),
        }
    }

    pub(crate) fn ensure_not_worker(&self) -> Result<(), PoolError> {
        if self.worker_slot(thread::current().id()).is_some() {
            return Err(PoolError::Deadlock(format!(
                "wait_for_idle called from a worker thread of pool `{}`",
                self.name
            )));
        }
        Ok(())
    }

    pub(crate) fn idle_handle(&self) -> &WaitHandle {
        &self.idle
    }

    /// Stop accepting work, cancel everything that has not started and take
    /// the worker registry. Returns `None` if shutdown already began.
    ///
    /// The flag flips and the registry drains under the registry lock before
    /// the queue wakes anyone, so every live worker is handed back here and
    /// none can be spawned afterwards.
    fn begin_shutdown(&self) -> Option<HashMap<ThreadId, WorkerEntry>> {
        let workers: HashMap<ThreadId, WorkerEntry> = {
            let mut workers = self.workers.lock();
            if self.shutdown.swap(true, Ordering::AcqRel) {
                return None;
            }
            self.alive.store(0, Ordering::Release);
            workers.drain().collect()
        };
        let groups: Vec<Arc<GroupInner>> = self.groups.lock().drain().map(|(_, g)| g).collect();
        for group in &groups {
            group.cancel();
        }
        let leftovers = self.queue.shutdown();
        if !leftovers.is_empty() {
            debug!(pool = %self.name, count = leftovers.len(), "canceling items left in queue");
        }
        for item in leftovers {
            self.abandon(item);
        }
        Some(workers)
    }
}

/// A pool of worker threads executing prioritized work items.
///
/// Dropping the pool signals shutdown without waiting for workers; call
/// [`shutdown`](Self::shutdown) to join them.
pub struct ThreadPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("name", &self.inner.name)
            .field("threads_alive", &self.threads_alive())
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

impl ThreadPool {
    /// Create a pool from configuration.
    ///
    /// Unless `start_suspended` is set, `min_worker_threads` threads are
    /// spawned immediately.
    ///
    /// # Errors
    ///
    /// [`PoolError::InvalidConfig`] for invalid bounds, [`PoolError::Spawn`]
    /// if an initial thread cannot be created.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        Self::with_hooks(config, WorkerHooks::default())
    }

    /// Create a pool whose worker threads run `hooks` on start and exit.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn with_hooks(config: PoolConfig, hooks: WorkerHooks) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;

        let name: Arc<str> = match &config.name {
            Some(name) => Arc::from(name.as_str()),
            None => {
                let id = uuid::Uuid::new_v4().simple().to_string();
                Arc::from(format!("pool-{}", &id[..8]))
            }
        };
        let thread_name_prefix = config
            .thread_name_prefix
            .clone()
            .unwrap_or_else(|| name.to_string());
        let (exit_tx, exit_rx) = unbounded();

        let inner = Arc::new(PoolInner {
            name: Arc::clone(&name),
            thread_name_prefix,
            stack_size: config.thread_stack_size,
            thread_priority: config.thread_priority,
            idle_timeout: config.idle_timeout(),
            default_priority: config.default_priority,
            default_policy: config.default_post_execute_policy,
            queue: BlockingQueue::new(),
            workers: Mutex::new(HashMap::new()),
            alive: AtomicUsize::new(0),
            min_threads: AtomicUsize::new(config.min_worker_threads),
            max_threads: AtomicUsize::new(config.max_worker_threads),
            pending: AtomicUsize::new(0),
            idle_sync: Mutex::new(()),
            idle: WaitHandle::with_state(true),
            shutdown: AtomicBool::new(false),
            suspended: AtomicBool::new(config.start_suspended),
            cancel_flag: Mutex::new(CancelFlag::new()),
            groups: Mutex::new(HashMap::new()),
            next_group_id: AtomicU64::new(NO_GROUP + 1),
            next_worker_id: AtomicUsize::new(0),
            counters: PoolCounters::default(),
            hooks,
            exit_tx,
            exit_rx,
        });

        if !config.start_suspended {
            if let Err(err) = inner.ensure_threads(config.min_worker_threads) {
                // Threads spawned so far exit on their own.
                let _ = inner.begin_shutdown();
                return Err(err);
            }
        }

        info!(
            pool = %name,
            min_threads = config.min_worker_threads,
            max_threads = config.max_worker_threads,
            idle_timeout_ms = config.idle_timeout_ms,
            suspended = config.start_suspended,
            "thread pool created"
        );

        Ok(Self { inner })
    }

    /// Create a work items group backed by this pool.
    ///
    /// # Errors
    ///
    /// [`PoolError::InvalidConfig`] for a zero concurrency,
    /// [`PoolError::ShuttingDown`] after shutdown.
    pub fn create_group(&self, config: GroupConfig) -> Result<WorkItemsGroup, PoolError> {
        WorkItemsGroup::new(Arc::clone(&self.inner), config)
    }

    /// Current lower thread bound.
    #[must_use]
    pub fn min_threads(&self) -> usize {
        self.inner.min_threads.load(Ordering::Acquire)
    }

    /// Current upper thread bound.
    #[must_use]
    pub fn max_threads(&self) -> usize {
        self.inner.max_threads.load(Ordering::Acquire)
    }

    /// Change the lower thread bound, spawning threads to reach it.
    ///
    /// # Errors
    ///
    /// [`PoolError::InvalidConfig`] if `min` exceeds the maximum,
    /// [`PoolError::Spawn`] if a thread cannot be created.
    pub fn set_min_threads(&self, min: usize) -> Result<(), PoolError> {
        {
            let _workers = self.inner.workers.lock();
            let max = self.max_threads();
            if min > max {
                return Err(PoolError::InvalidConfig(format!(
                    "min_worker_threads ({min}) must not exceed max_worker_threads ({max})"
                )));
            }
            self.inner.min_threads.store(min, Ordering::Release);
        }
        if self.is_suspended() || self.is_shut_down() {
            return Ok(());
        }
        self.inner.ensure_threads(min)
    }

    /// Change the upper thread bound. Surplus threads retire after their
    /// current item.
    ///
    /// # Errors
    ///
    /// [`PoolError::InvalidConfig`] if `max` is zero or below the minimum.
    pub fn set_max_threads(&self, max: usize) -> Result<(), PoolError> {
        let _workers = self.inner.workers.lock();
        let min = self.min_threads();
        if max == 0 || max < min {
            return Err(PoolError::InvalidConfig(format!(
                "max_worker_threads ({max}) must be greater than 0 and at least min_worker_threads ({min})"
            )));
        }
        self.inner.max_threads.store(max, Ordering::Release);
        Ok(())
    }

    /// Live worker threads.
    #[must_use]
    pub fn threads_alive(&self) -> usize {
        self.inner.alive.load(Ordering::Acquire)
    }

    /// Worker threads currently running an item.
    #[must_use]
    pub fn threads_in_use(&self) -> usize {
        self.inner.queue.in_flight()
    }

    /// Items queued or running.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending()
    }

    /// Whether the pool was created suspended and not started yet.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.inner.suspended.load(Ordering::Acquire)
    }

    /// Whether shutdown has begun.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.is_shut_down()
    }

    /// Snapshot of pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let counters = &self.inner.counters;
        PoolStats {
            name: self.inner.name.to_string(),
            threads_alive: self.threads_alive(),
            threads_in_use: self.threads_in_use(),
            peak_threads: counters.peak_threads.load(Ordering::Relaxed),
            min_threads: self.min_threads(),
            max_threads: self.max_threads(),
            queued_items: self.inner.queue.len(),
            pending_items: self.pending_count(),
            active_groups: self.inner.groups.lock().len(),
            submitted: counters.submitted.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
            faulted: counters.faulted.load(Ordering::Relaxed),
            canceled: counters.canceled.load(Ordering::Relaxed),
        }
    }

    /// Shut down and wait for every worker thread to exit.
    ///
    /// Queued items are canceled; running items finish first.
    pub fn shutdown(&self) -> ShutdownReport {
        self.shutdown_with(None)
    }

    /// Shut down, waiting at most `timeout` for worker threads.
    ///
    /// Threads still running an item at the deadline are detached rather than
    /// stopped: the pool forgets them and they exit once their item returns.
    pub fn shutdown_timeout(&self, timeout: Duration) -> ShutdownReport {
        self.shutdown_with(Some(timeout))
    }

    fn shutdown_with(&self, timeout: Option<Duration>) -> ShutdownReport {
        let deadline = deadline_after(timeout);
        let Some(mut remaining) = self.inner.begin_shutdown() else {
            return ShutdownReport::default();
        };
        info!(pool = %self.inner.name, workers = remaining.len(), "shutting down thread pool");

        let mut report = ShutdownReport::default();
        if let Some(entry) = remaining.remove(&thread::current().id()) {
            warn!(
                pool = %self.inner.name,
                worker_id = entry.worker_id,
                "shutdown called from a worker thread; it cannot join itself"
            );
            report.detached += 1;
        }

        while !remaining.is_empty() {
            let exited = match deadline {
                Some(deadline) => self.inner.exit_rx.recv_deadline(deadline).ok(),
                None => self.inner.exit_rx.recv().ok(),
            };
            let Some(thread_id) = exited else {
                break;
            };
            if let Some(entry) = remaining.remove(&thread_id) {
                if entry.handle.join().is_err() {
                    warn!(pool = %self.inner.name, worker_id = entry.worker_id, "worker thread panicked");
                } else {
                    debug!(pool = %self.inner.name, worker_id = entry.worker_id, "worker joined");
                }
                report.joined += 1;
            }
        }

        for entry in remaining.into_values() {
            warn!(
                pool = %self.inner.name,
                worker_id = entry.worker_id,
                "worker did not exit within timeout - detaching"
            );
            report.detached += 1;
        }

        info!(
            pool = %self.inner.name,
            joined = report.joined,
            detached = report.detached,
            "thread pool shut down"
        );
        report
    }

    pub(crate) fn inner(&self) -> &Arc<PoolInner> {
        &self.inner
    }
}

impl WorkScheduler for ThreadPool {
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
        if inner.is_shut_down() {
            return Err(PoolError::ShuttingDown);
        }

        let priority = options.priority.unwrap_or(inner.default_priority);
        let item = WorkItem::new(
            Box::new(job),
            WorkItemParams {
                priority,
                policy: options.post_execute_policy.unwrap_or(inner.default_policy),
                post_execute: options.post_execute,
                context: options.context,
                cancel_flag: inner.current_cancel_flag(),
                pool_name: Arc::clone(&inner.name),
                group: None,
            },
        );
        let handle = WorkItemHandle::new(Arc::clone(&item));
        if inner.enqueue(item).is_err() {
            return Err(PoolError::ShuttingDown);
        }
        debug!(pool = %inner.name, %priority, "work item queued");
        Ok(handle)
    }

    fn wait_for_idle(&self, timeout: Option<Duration>) -> Result<bool, PoolError> {
        self.inner.ensure_not_worker()?;
        Ok(self.inner.idle.wait_timeout(timeout))
    }

    /// Cancel every queued item of the pool and of all its active groups.
    fn cancel(&self) {
        let previous = std::mem::replace(&mut *self.inner.cancel_flag.lock(), CancelFlag::new());
        previous.cancel();
        let groups: Vec<Arc<GroupInner>> = self.inner.groups.lock().values().cloned().collect();
        for group in &groups {
            group.cancel();
        }
        info!(pool = %self.inner.name, groups = groups.len(), "thread pool canceled");
    }

    fn start(&self) {
        if !self.inner.suspended.swap(false, Ordering::AcqRel) {
            return;
        }
        let target = self
            .min_threads()
            .max(self.inner.queue.len().min(self.max_threads()));
        if let Err(err) = self.inner.ensure_threads(target) {
            error!(pool = %self.inner.name, error = %err, "failed to start worker threads");
        }
        info!(pool = %self.inner.name, threads = self.threads_alive(), "thread pool started");
    }

    fn is_idle(&self) -> bool {
        self.pending_count() == 0
    }

    fn concurrency(&self) -> usize {
        self.max_threads()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        // Signal shutdown but don't join workers in Drop
        if let Some(workers) = self.inner.begin_shutdown() {
            debug!(
                pool = %self.inner.name,
                detached = workers.len(),
                "ThreadPool dropped without explicit shutdown - workers will be detached"
            );
        }
    }
}
