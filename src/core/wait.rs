//! Waiting on several work item results at once.

use std::sync::Arc;
use std::time::Duration;

use super::wait_handle::{deadline_after, wait_until_ready, WaitHandle};

/// Largest number of results [`wait_all`] waits on in a single combined wait.
/// Longer lists, or waits with a cancel handle, are waited one item at a time
/// against a shared deadline.
pub const MAX_WAIT_HANDLES: usize = 64;

/// Source of completion signals behind a [`WaitLease`].
pub(crate) trait WaitSource: Send + Sync {
    fn is_finished(&self) -> bool;
    fn acquire_wait_handle(&self) -> WaitHandle;
    fn release_wait_handle(&self);
    /// Event set when the item's cancellation epoch is canceled.
    fn cancel_event(&self) -> WaitHandle;
}

/// Borrowed completion handles of one work item.
///
/// Holding a lease keeps the item's lazily allocated wait handle alive; it is
/// released when the last lease drops.
pub struct WaitLease {
    source: Arc<dyn WaitSource>,
    handles: [WaitHandle; 2],
}

impl WaitLease {
    pub(crate) fn new(source: Arc<dyn WaitSource>) -> Self {
        let handles = [source.acquire_wait_handle(), source.cancel_event()];
        Self { source, handles }
    }

    /// Handles that are set whenever the item may have become finished.
    #[must_use]
    pub fn handles(&self) -> &[WaitHandle] {
        &self.handles
    }

    /// Whether the leased item is completed or canceled.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.source.is_finished()
    }
}

impl Drop for WaitLease {
    fn drop(&mut self) {
        self.source.release_wait_handle();
    }
}

/// Anything [`wait_all`] and [`wait_any`] can wait on.
pub trait WaitableResult {
    /// Whether the work item is completed or canceled.
    fn is_finished(&self) -> bool;

    /// Lease the item's completion handles for the duration of a wait.
    fn lease(&self) -> WaitLease;
}

impl<W: WaitableResult + ?Sized> WaitableResult for &W {
    fn is_finished(&self) -> bool {
        (**self).is_finished()
    }

    fn lease(&self) -> WaitLease {
        (**self).lease()
    }
}

fn cancel_requested(cancel: Option<&WaitHandle>) -> bool {
    cancel.is_some_and(WaitHandle::is_set)
}

/// Wait until every result is completed or canceled.
///
/// Returns `true` if all finished, `false` if `timeout` elapsed first or
/// `cancel` was signaled. An empty list returns `true` immediately.
pub fn wait_all<W: WaitableResult>(
    results: &[W],
    timeout: Option<Duration>,
    cancel: Option<&WaitHandle>,
) -> bool {
    if results.is_empty() {
        return true;
    }
    let deadline = deadline_after(timeout);

    if cancel.is_none() && results.len() <= MAX_WAIT_HANDLES {
        let leases: Vec<WaitLease> = results.iter().map(WaitableResult::lease).collect();
        let handles: Vec<WaitHandle> = leases
            .iter()
            .flat_map(|lease| lease.handles().iter().cloned())
            .collect();
        return wait_until_ready(&handles, deadline, || {
            leases.iter().all(WaitLease::is_finished)
        });
    }

    for result in results {
        if result.is_finished() {
            continue;
        }
        if cancel_requested(cancel) {
            return false;
        }
        let lease = result.lease();
        let mut handles = lease.handles().to_vec();
        if let Some(cancel) = cancel {
            handles.push(cancel.clone());
        }
        wait_until_ready(&handles, deadline, || {
            lease.is_finished() || cancel_requested(cancel)
        });
        if !lease.is_finished() {
            return false;
        }
    }
    true
}

/// Wait until at least one result is completed or canceled.
///
/// Returns the index of the first finished result in list order, or `None`
/// if `timeout` elapsed, `cancel` was signaled (checked first), or the list
/// is empty.
pub fn wait_any<W: WaitableResult>(
    results: &[W],
    timeout: Option<Duration>,
    cancel: Option<&WaitHandle>,
) -> Option<usize> {
    if results.is_empty() || cancel_requested(cancel) {
        return None;
    }

    let leases: Vec<WaitLease> = results.iter().map(WaitableResult::lease).collect();
    let mut handles: Vec<WaitHandle> = leases
        .iter()
        .flat_map(|lease| lease.handles().iter().cloned())
        .collect();
    if let Some(cancel) = cancel {
        handles.push(cancel.clone());
    }

    let ready = wait_until_ready(&handles, deadline_after(timeout), || {
        cancel_requested(cancel) || leases.iter().any(WaitLease::is_finished)
    });
    if !ready || cancel_requested(cancel) {
        return None;
    }
    leases.iter().position(WaitLease::is_finished)
}
