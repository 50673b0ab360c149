//! Work item state machine.
//!
//! A work item moves `InQueue -> InProgress -> Completed`, or straight from
//! `InQueue` to `Canceled`. Cancellation is also observed lazily: every state
//! read consults the cancellation epoch the item was queued under, so
//! canceling a whole group or pool is a single flag store.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::{AppResult, FaultCause, PanicFault, PoolError};
use super::group::{GroupId, GroupInner};
use super::result::WorkItemHandle;
use super::wait::WaitSource;
use super::wait_handle::WaitHandle;
use crate::util::serde::{PostExecutePolicy, Priority};

/// Lifecycle state of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemState {
    /// Waiting in a queue.
    InQueue,
    /// Picked up by a worker and running.
    InProgress,
    /// Ran to completion, successfully or not.
    Completed,
    /// Canceled before it ran.
    Canceled,
}

impl WorkItemState {
    /// Whether the state can no longer change.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Canceled)
    }
}

/// Shared cancellation flag for one epoch of a pool or group.
///
/// Items hold the flag that was current when they were queued. Setting it
/// cancels every item of that epoch that has not started yet.
#[derive(Clone)]
pub(crate) struct CancelFlag {
    inner: Arc<CancelFlagInner>,
}

struct CancelFlagInner {
    canceled: AtomicBool,
    /// Set together with `canceled` so blocked result waiters wake up.
    event: WaitHandle,
}

impl CancelFlag {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(CancelFlagInner {
                canceled: AtomicBool::new(false),
                event: WaitHandle::new(),
            }),
        }
    }

    pub(crate) fn cancel(&self) {
        self.inner.canceled.store(true, Ordering::Release);
        self.inner.event.set();
    }

    pub(crate) fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::Acquire)
    }

    pub(crate) fn event(&self) -> &WaitHandle {
        &self.inner.event
    }
}

/// Captures caller context at submission time.
///
/// The pool never interprets the snapshot; it only guarantees `snapshot` runs
/// before the item is queued and `restore` runs on the worker thread right
/// before the callback.
pub trait ContextCapture: Send + Sync {
    /// Capture the submitting thread's context.
    fn snapshot(&self) -> Box<dyn ContextSnapshot>;
}

/// Context captured by [`ContextCapture::snapshot`].
pub trait ContextSnapshot: Send {
    /// Install the captured context on the current (worker) thread.
    fn restore(self: Box<Self>);
}

/// Callback invoked after a work item ran or was canceled, per its policy.
pub type PostExecuteCallback<T> = Box<dyn FnOnce(&WorkItemHandle<T>) + Send + 'static>;

pub(crate) type Job<T> = Box<dyn FnOnce(&WorkItemContext) -> AppResult<T> + Send + 'static>;

/// Per-submission options. Unset fields fall back to group, then pool defaults.
pub struct WorkItemOptions<T> {
    /// Queue priority.
    pub priority: Option<Priority>,
    /// Callback fired after execution or cancellation.
    pub post_execute: Option<PostExecuteCallback<T>>,
    /// When `post_execute` fires.
    pub post_execute_policy: Option<PostExecutePolicy>,
    /// Caller-context propagation hook.
    pub context: Option<Arc<dyn ContextCapture>>,
}

impl<T> Default for WorkItemOptions<T> {
    fn default() -> Self {
        Self {
            priority: None,
            post_execute: None,
            post_execute_policy: None,
            context: None,
        }
    }
}

impl<T> WorkItemOptions<T> {
    /// Options with every field unset.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the queue priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set the post-execute callback.
    #[must_use]
    pub fn with_post_execute<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&WorkItemHandle<T>) + Send + 'static,
    {
        self.post_execute = Some(Box::new(callback));
        self
    }

    /// Set when the post-execute callback fires.
    #[must_use]
    pub fn with_post_execute_policy(mut self, policy: PostExecutePolicy) -> Self {
        self.post_execute_policy = Some(policy);
        self
    }

    /// Set the caller-context propagation hook.
    #[must_use]
    pub fn with_context(mut self, context: Arc<dyn ContextCapture>) -> Self {
        self.context = Some(context);
        self
    }
}

/// Execution context handed to every work item callback.
pub struct WorkItemContext {
    pool_name: Arc<str>,
    group_id: Option<GroupId>,
    priority: Priority,
    waited: Duration,
    cancel_flag: CancelFlag,
}

impl WorkItemContext {
    /// Name of the pool running the item.
    #[must_use]
    pub fn pool_name(&self) -> &str {
        &self.pool_name
    }

    /// Group the item was submitted through, if any.
    #[must_use]
    pub const fn group_id(&self) -> Option<GroupId> {
        self.group_id
    }

    /// Priority the item was queued with.
    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    /// Time between submission and start.
    #[must_use]
    pub const fn wait_time(&self) -> Duration {
        self.waited
    }

    /// Whether the item's group or pool has been canceled since it was queued.
    ///
    /// Running items are never stopped; long callbacks may poll this and
    /// return early.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.cancel_flag.is_canceled()
    }
}

/// Back reference from a work item to the group that forwarded it.
pub(crate) struct GroupLink {
    pub(crate) group: Weak<GroupInner>,
    pub(crate) id: GroupId,
    /// Group cancellation epoch the item was queued under.
    pub(crate) epoch: u64,
}

/// How a work item ended, for pool statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Completion {
    Succeeded,
    Faulted,
    Canceled,
    Unfinished,
}

/// Object-safe view of a work item used by queues, groups and workers.
pub(crate) trait QueuedWorkItem: Send + Sync {
    fn priority(&self) -> Priority;
    fn group_link(&self) -> Option<&GroupLink>;
    /// Worker-side check-and-transition before execution. Returns whether
    /// `execute` must be called.
    fn starting(&self) -> bool;
    /// Run the callback (if in progress) and the post-execute callback per policy.
    fn execute(self: Arc<Self>);
    /// Cancel an item that will never reach a worker.
    fn discard(self: Arc<Self>);
    fn completion(&self) -> Completion;
}

pub(crate) type SharedWorkItem = Arc<dyn QueuedWorkItem>;

/// Lazily allocated completion handle, shared by every concurrent waiter.
enum WaitSlot {
    Empty,
    Allocated { handle: WaitHandle, waiters: usize },
}

struct ItemInner<T> {
    state: WorkItemState,
    outcome: Option<Result<T, FaultCause>>,
    wait: WaitSlot,
    queued_at: Instant,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
}

/// Everything besides the callback needed to build a work item.
pub(crate) struct WorkItemParams<T> {
    pub(crate) priority: Priority,
    pub(crate) policy: PostExecutePolicy,
    pub(crate) post_execute: Option<PostExecuteCallback<T>>,
    pub(crate) context: Option<Arc<dyn ContextCapture>>,
    pub(crate) cancel_flag: CancelFlag,
    pub(crate) pool_name: Arc<str>,
    pub(crate) group: Option<GroupLink>,
}

/// One scheduled unit of work.
pub(crate) struct WorkItem<T> {
    priority: Priority,
    policy: PostExecutePolicy,
    has_post_execute: bool,
    cancel_flag: CancelFlag,
    pool_name: Arc<str>,
    group: Option<GroupLink>,
    job: Mutex<Option<Job<T>>>,
    post_execute: Mutex<Option<PostExecuteCallback<T>>>,
    snapshot: Mutex<Option<Box<dyn ContextSnapshot>>>,
    inner: Mutex<ItemInner<T>>,
}

impl<T: Send + 'static> WorkItem<T> {
    pub(crate) fn new(job: Job<T>, params: WorkItemParams<T>) -> Arc<Self> {
        let snapshot = params.context.as_ref().map(|hook| hook.snapshot());
        Arc::new(Self {
            priority: params.priority,
            policy: params.policy,
            has_post_execute: params.post_execute.is_some(),
            cancel_flag: params.cancel_flag,
            pool_name: params.pool_name,
            group: params.group,
            job: Mutex::new(Some(job)),
            post_execute: Mutex::new(params.post_execute),
            snapshot: Mutex::new(snapshot),
            inner: Mutex::new(ItemInner {
                state: WorkItemState::InQueue,
                outcome: None,
                wait: WaitSlot::Empty,
                queued_at: Instant::now(),
                started_at: None,
                finished_at: None,
            }),
        })
    }

    /// Stored state, with a pending epoch cancellation applied.
    fn effective_state(&self, inner: &ItemInner<T>) -> WorkItemState {
        if inner.state == WorkItemState::InQueue && self.cancel_flag.is_canceled() {
            WorkItemState::Canceled
        } else {
            inner.state
        }
    }

    pub(crate) fn state(&self) -> WorkItemState {
        self.effective_state(&self.inner.lock())
    }

    pub(crate) const fn item_priority(&self) -> Priority {
        self.priority
    }

    /// Cancel if still queued. Running or completed items are not affected.
    pub(crate) fn cancel(&self) -> bool {
        let mut inner = self.inner.lock();
        match self.effective_state(&inner) {
            WorkItemState::InQueue | WorkItemState::Canceled => {
                Self::finish_canceled(&mut inner);
                true
            }
            WorkItemState::InProgress | WorkItemState::Completed => false,
        }
    }

    /// Make a cancellation permanent and release waiters. No-op if already stored.
    fn finish_canceled(inner: &mut ItemInner<T>) {
        if inner.state == WorkItemState::Canceled {
            return;
        }
        inner.state = WorkItemState::Canceled;
        inner.finished_at = Some(Instant::now());
        Self::signal(inner);
    }

    fn signal(inner: &ItemInner<T>) {
        if let WaitSlot::Allocated { handle, .. } = &inner.wait {
            handle.set();
        }
    }

    /// Record the callback outcome and wake every waiter. Called once, on the
    /// executing thread.
    fn set_result(&self, outcome: Result<T, FaultCause>) {
        let mut inner = self.inner.lock();
        inner.outcome = Some(outcome);
        inner.state = WorkItemState::Completed;
        inner.finished_at = Some(Instant::now());
        Self::signal(&inner);
    }

    fn context(&self, waited: Duration) -> WorkItemContext {
        WorkItemContext {
            pool_name: Arc::clone(&self.pool_name),
            group_id: self.group.as_ref().map(|link| link.id),
            priority: self.priority,
            waited,
            cancel_flag: self.cancel_flag.clone(),
        }
    }

    fn run_job(&self) -> Result<T, FaultCause> {
        let Some(job) = self.job.lock().take() else {
            return Err(Arc::new(PoolError::Internal(
                "work item callback already consumed".into(),
            )));
        };

        if let Some(snapshot) = self.snapshot.lock().take() {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| snapshot.restore())) {
                warn!(
                    pool = %self.pool_name,
                    panic = %PanicFault::from_payload(payload.as_ref()),
                    "context restore panicked"
                );
            }
        }

        let ctx = self.context(self.wait_time());
        match catch_unwind(AssertUnwindSafe(|| job(&ctx))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                let boxed: Box<dyn std::error::Error + Send + Sync + 'static> = err.into();
                Err(Arc::from(boxed))
            }
            Err(payload) => Err(Arc::new(PanicFault::from_payload(payload.as_ref()))),
        }
    }

    fn run_post_execute(self: &Arc<Self>) {
        let Some(callback) = self.post_execute.lock().take() else {
            return;
        };
        let handle = WorkItemHandle::new(Arc::clone(self));
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(&handle))) {
            warn!(
                pool = %self.pool_name,
                panic = %PanicFault::from_payload(payload.as_ref()),
                "post-execute callback panicked"
            );
        }
    }

    /// Clone of the value or fault, or the error describing why there is none.
    pub(crate) fn outcome(&self) -> Result<T, PoolError>
    where
        T: Clone,
    {
        let inner = self.inner.lock();
        match self.effective_state(&inner) {
            WorkItemState::Canceled => Err(PoolError::Canceled),
            WorkItemState::Completed => match inner.outcome.as_ref() {
                Some(Ok(value)) => Ok(value.clone()),
                Some(Err(cause)) => Err(PoolError::Faulted(Arc::clone(cause))),
                None => Err(PoolError::Internal("completed work item has no outcome".into())),
            },
            WorkItemState::InQueue | WorkItemState::InProgress => Err(PoolError::TimedOut),
        }
    }

    /// Time spent queued; still growing while the item waits.
    pub(crate) fn wait_time(&self) -> Duration {
        let inner = self.inner.lock();
        let until = inner
            .started_at
            .or(inner.finished_at)
            .unwrap_or_else(Instant::now);
        until.saturating_duration_since(inner.queued_at)
    }

    /// Time spent executing; zero for items that never started.
    pub(crate) fn process_time(&self) -> Duration {
        let inner = self.inner.lock();
        inner.started_at.map_or(Duration::ZERO, |started| {
            inner
                .finished_at
                .unwrap_or_else(Instant::now)
                .saturating_duration_since(started)
        })
    }
}

impl<T: Send + 'static> QueuedWorkItem for WorkItem<T> {
    fn priority(&self) -> Priority {
        self.priority
    }

    fn group_link(&self) -> Option<&GroupLink> {
        self.group.as_ref()
    }

    fn starting(&self) -> bool {
        let mut inner = self.inner.lock();
        match self.effective_state(&inner) {
            WorkItemState::Canceled => {
                Self::finish_canceled(&mut inner);
                self.has_post_execute && self.policy.runs_when_canceled()
            }
            WorkItemState::InQueue => {
                inner.state = WorkItemState::InProgress;
                inner.started_at = Some(Instant::now());
                true
            }
            state => {
                debug!(?state, "work item dequeued in unexpected state");
                false
            }
        }
    }

    fn execute(self: Arc<Self>) {
        let state = self.inner.lock().state;
        match state {
            WorkItemState::InProgress => {
                let outcome = self.run_job();
                self.set_result(outcome);
                if self.policy.runs_when_not_canceled() {
                    self.run_post_execute();
                }
            }
            WorkItemState::Canceled => {
                if self.policy.runs_when_canceled() {
                    self.run_post_execute();
                }
            }
            state => debug!(?state, "work item not executable"),
        }
    }

    fn discard(self: Arc<Self>) {
        let run_post = {
            let mut inner = self.inner.lock();
            match self.effective_state(&inner) {
                WorkItemState::InQueue | WorkItemState::Canceled => {
                    Self::finish_canceled(&mut inner);
                    self.has_post_execute && self.policy.runs_when_canceled()
                }
                _ => false,
            }
        };
        if run_post {
            self.run_post_execute();
        }
    }

    fn completion(&self) -> Completion {
        let inner = self.inner.lock();
        match self.effective_state(&inner) {
            WorkItemState::Canceled => Completion::Canceled,
            WorkItemState::Completed => match inner.outcome {
                Some(Err(_)) => Completion::Faulted,
                _ => Completion::Succeeded,
            },
            WorkItemState::InQueue | WorkItemState::InProgress => Completion::Unfinished,
        }
    }
}

impl<T: Send + 'static> WaitSource for WorkItem<T> {
    fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    fn acquire_wait_handle(&self) -> WaitHandle {
        let mut inner = self.inner.lock();
        let terminal = inner.state.is_terminal();
        match &mut inner.wait {
            WaitSlot::Allocated { handle, waiters } => {
                *waiters += 1;
                handle.clone()
            }
            WaitSlot::Empty => {
                let handle = WaitHandle::with_state(terminal);
                inner.wait = WaitSlot::Allocated {
                    handle: handle.clone(),
                    waiters: 1,
                };
                handle
            }
        }
    }

    fn release_wait_handle(&self) {
        let mut inner = self.inner.lock();
        let last = match &mut inner.wait {
            WaitSlot::Allocated { waiters, .. } => {
                *waiters = waiters.saturating_sub(1);
                *waiters == 0
            }
            WaitSlot::Empty => false,
        };
        if last {
            inner.wait = WaitSlot::Empty;
        }
    }

    fn cancel_event(&self) -> WaitHandle {
        self.cancel_flag.event().clone()
    }
}
