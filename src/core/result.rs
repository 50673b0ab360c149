//! Caller-side handle to a submitted work item.

use std::sync::Arc;
use std::time::Duration;

use super::error::{FaultCause, PoolError};
use super::wait::{WaitLease, WaitSource, WaitableResult};
use super::wait_handle::{deadline_after, wait_until_ready, WaitHandle};
use super::work_item::{WorkItem, WorkItemState};
use crate::util::serde::Priority;

/// Handle returned by every submission.
///
/// Cloning is cheap; all clones observe the same work item. Results are
/// cloned out on retrieval, so any number of callers may read them.
pub struct WorkItemHandle<T> {
    item: Arc<WorkItem<T>>,
}

impl<T> Clone for WorkItemHandle<T> {
    fn clone(&self) -> Self {
        Self {
            item: Arc::clone(&self.item),
        }
    }
}

impl<T: Send + 'static> std::fmt::Debug for WorkItemHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItemHandle")
            .field("state", &self.state())
            .field("priority", &self.priority())
            .finish()
    }
}

impl<T: Send + 'static> WorkItemHandle<T> {
    pub(crate) const fn new(item: Arc<WorkItem<T>>) -> Self {
        Self { item }
    }

    /// Current state, with pending group or pool cancellation applied.
    #[must_use]
    pub fn state(&self) -> WorkItemState {
        self.item.state()
    }

    /// Whether the item ran to completion (successfully or not).
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.state() == WorkItemState::Completed
    }

    /// Whether the item was canceled.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.state() == WorkItemState::Canceled
    }

    /// Priority the item was queued with.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.item.item_priority()
    }

    /// Cancel the item if it has not started.
    ///
    /// Returns `true` if the item is (now) canceled, `false` if it is already
    /// running or completed. Running callbacks are never interrupted.
    pub fn cancel(&self) -> bool {
        self.item.cancel()
    }

    /// Time the item spent queued.
    #[must_use]
    pub fn wait_time(&self) -> Duration {
        self.item.wait_time()
    }

    /// Time the callback ran; zero if it never started.
    #[must_use]
    pub fn process_time(&self) -> Duration {
        self.item.process_time()
    }

    /// Block until the item is completed or canceled.
    ///
    /// Returns `false` if `timeout` elapsed or `cancel` was signaled first.
    pub fn wait(&self, timeout: Option<Duration>, cancel: Option<&WaitHandle>) -> bool {
        if self.is_finished() {
            return true;
        }
        let lease = self.lease();
        let mut handles = lease.handles().to_vec();
        if let Some(cancel) = cancel {
            handles.push(cancel.clone());
        }
        wait_until_ready(&handles, deadline_after(timeout), || {
            lease.is_finished() || cancel.is_some_and(WaitHandle::is_set)
        });
        lease.is_finished()
    }
}

impl<T: Clone + Send + 'static> WorkItemHandle<T> {
    /// Block until the result is available.
    ///
    /// # Errors
    ///
    /// [`PoolError::Canceled`] if the item was canceled, or
    /// [`PoolError::Faulted`] if the callback returned an error or panicked.
    pub fn get_result(&self) -> Result<T, PoolError> {
        self.get_result_with(None, None)
    }

    /// Block up to `timeout` for the result.
    ///
    /// # Errors
    ///
    /// As [`get_result`](Self::get_result), plus [`PoolError::TimedOut`].
    pub fn get_result_timeout(&self, timeout: Duration) -> Result<T, PoolError> {
        self.get_result_with(Some(timeout), None)
    }

    /// Block for the result until `timeout` elapses or `cancel` is signaled.
    ///
    /// A signaled `cancel` handle is reported as [`PoolError::TimedOut`]: it
    /// stops the wait, not the work item. If the item finishes at the same
    /// time, its outcome wins.
    ///
    /// # Errors
    ///
    /// [`PoolError::Canceled`], [`PoolError::Faulted`] or [`PoolError::TimedOut`].
    pub fn get_result_with(
        &self,
        timeout: Option<Duration>,
        cancel: Option<&WaitHandle>,
    ) -> Result<T, PoolError> {
        if !self.wait(timeout, cancel) {
            return Err(PoolError::TimedOut);
        }
        self.item.outcome()
    }
}

impl<T: Clone + Default + Send + 'static> WorkItemHandle<T> {
    /// Like [`get_result_with`](Self::get_result_with), but a callback fault is
    /// returned beside a default value instead of as an error.
    ///
    /// # Errors
    ///
    /// [`PoolError::Canceled`] or [`PoolError::TimedOut`].
    pub fn get_result_with_fault(
        &self,
        timeout: Option<Duration>,
        cancel: Option<&WaitHandle>,
    ) -> Result<(T, Option<FaultCause>), PoolError> {
        match self.get_result_with(timeout, cancel) {
            Ok(value) => Ok((value, None)),
            Err(PoolError::Faulted(cause)) => Ok((T::default(), Some(cause))),
            Err(err) => Err(err),
        }
    }
}

impl<T: Send + 'static> WaitableResult for WorkItemHandle<T> {
    fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    fn lease(&self) -> WaitLease {
        let source: Arc<dyn WaitSource> = self.item.clone();
        WaitLease::new(source)
    }
}
