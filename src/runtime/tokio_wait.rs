//! Async waits for tokio callers.
//!
//! Result and idle waits block on parking_lot primitives, so they are moved
//! onto tokio's blocking thread pool with `spawn_blocking` instead of being
//! polled.

use std::time::Duration;

use crate::core::{PoolError, ThreadPool, WaitHandle, WorkItemHandle, WorkItemsGroup};

fn join_error(err: &tokio::task::JoinError) -> PoolError {
    PoolError::Internal(format!("background waiter failed: {err}"))
}

async fn wait_handle_async(handle: WaitHandle, timeout: Option<Duration>) -> Result<bool, PoolError> {
    if handle.is_set() {
        return Ok(true);
    }
    tokio::task::spawn_blocking(move || handle.wait_timeout(timeout))
        .await
        .map_err(|e| join_error(&e))
}

impl<T: Clone + Send + 'static> WorkItemHandle<T> {
    /// Async variant of [`get_result_with`](Self::get_result_with) without a
    /// cancel handle.
    ///
    /// # Errors
    ///
    /// As [`get_result_with`](Self::get_result_with), plus
    /// [`PoolError::Internal`] if the background waiter fails.
    pub async fn get_result_async(&self, timeout: Option<Duration>) -> Result<T, PoolError> {
        if self.state().is_terminal() {
            return self.get_result_with(Some(Duration::ZERO), None);
        }
        let handle = self.clone();
        tokio::task::spawn_blocking(move || handle.get_result_with(timeout, None))
            .await
            .map_err(|e| join_error(&e))?
    }
}

impl ThreadPool {
    /// Async variant of [`WorkScheduler::wait_for_idle`](crate::core::WorkScheduler::wait_for_idle).
    ///
    /// # Errors
    ///
    /// [`PoolError::Deadlock`] from a worker thread of this pool,
    /// [`PoolError::Internal`] if the background waiter fails.
    pub async fn wait_for_idle_async(&self, timeout: Option<Duration>) -> Result<bool, PoolError> {
        self.inner().ensure_not_worker()?;
        wait_handle_async(self.inner().idle_handle().clone(), timeout).await
    }
}

impl WorkItemsGroup {
    /// Async variant of [`WorkScheduler::wait_for_idle`](crate::core::WorkScheduler::wait_for_idle).
    ///
    /// # Errors
    ///
    /// [`PoolError::Deadlock`] from a work item of this group,
    /// [`PoolError::Internal`] if the background waiter fails.
    pub async fn wait_for_idle_async(&self, timeout: Option<Duration>) -> Result<bool, PoolError> {
        self.ensure_not_member()?;
        wait_handle_async(self.idle_handle(), timeout).await
    }
}
