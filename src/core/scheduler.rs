//! Submission surface shared by thread pools and work item groups.

use std::time::Duration;

use super::error::{AppResult, PoolError};
use super::result::WorkItemHandle;
use super::work_item::{WorkItemContext, WorkItemOptions};
use crate::util::serde::Priority;

/// Anything that accepts work items: a [`ThreadPool`](super::ThreadPool) or a
/// [`WorkItemsGroup`](super::WorkItemsGroup).
pub trait WorkScheduler {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Queue `job` with explicit options.
    ///
    /// # Errors
    ///
    /// [`PoolError::ShuttingDown`] once the backing pool has been shut down.
    fn submit_with<T, F>(
        &self,
        job: F,
        options: WorkItemOptions<T>,
    ) -> Result<WorkItemHandle<T>, PoolError>
    where
        T: Send + 'static,
        F: FnOnce(&WorkItemContext) -> AppResult<T> + Send + 'static;

    /// Queue `job` with default options.
    ///
    /// # Errors
    ///
    /// See [`submit_with`](Self::submit_with).
    fn submit<T, F>(&self, job: F) -> Result<WorkItemHandle<T>, PoolError>
    where
        T: Send + 'static,
        F: FnOnce(&WorkItemContext) -> AppResult<T> + Send + 'static,
    {
        self.submit_with(job, WorkItemOptions::default())
    }

    /// Queue `job` at `priority`.
    ///
    /// # Errors
    ///
    /// See [`submit_with`](Self::submit_with).
    fn submit_with_priority<T, F>(
        &self,
        job: F,
        priority: Priority,
    ) -> Result<WorkItemHandle<T>, PoolError>
    where
        T: Send + 'static,
        F: FnOnce(&WorkItemContext) -> AppResult<T> + Send + 'static,
    {
        self.submit_with(job, WorkItemOptions::default().with_priority(priority))
    }

    /// Block until nothing is queued or running, or `timeout` elapses.
    ///
    /// Returns `Ok(false)` on timeout.
    ///
    /// # Errors
    ///
    /// [`PoolError::Deadlock`] when called from a work item the wait depends on.
    fn wait_for_idle(&self, timeout: Option<Duration>) -> Result<bool, PoolError>;

    /// Cancel every queued item that has not started.
    fn cancel(&self);

    /// Begin processing if created suspended. No-op otherwise.
    fn start(&self);

    /// Whether nothing is queued or running.
    fn is_idle(&self) -> bool;

    /// Maximum number of items this scheduler runs at once.
    fn concurrency(&self) -> usize;
}
