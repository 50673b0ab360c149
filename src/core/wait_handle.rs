//! Manual-reset events and multi-handle waiting.
//!
//! A [`WaitHandle`] stays signaled until it is reset, so late waiters observe
//! an earlier `set`. Waiting on several handles at once does not poll: the
//! waiter registers one [`Watcher`] with every handle involved and each `set`
//! bumps the watcher's generation counter.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Generation counter a multi-handle waiter parks on.
pub(crate) struct Watcher {
    generation: Mutex<u64>,
    changed: Condvar,
}

impl Watcher {
    fn new() -> Self {
        Self {
            generation: Mutex::new(0),
            changed: Condvar::new(),
        }
    }

    fn notify(&self) {
        *self.generation.lock() += 1;
        self.changed.notify_all();
    }

    fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    /// Park until the generation moves past `seen` or `deadline` passes.
    /// Returns `false` on timeout.
    fn wait_past(&self, seen: u64, deadline: Option<Instant>) -> bool {
        let mut generation = self.generation.lock();
        while *generation == seen {
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut generation, deadline).timed_out() {
                        return *generation != seen;
                    }
                }
                None => self.changed.wait(&mut generation),
            }
        }
        true
    }
}

struct EventState {
    signaled: bool,
    watchers: Vec<Arc<Watcher>>,
}

struct EventInner {
    state: Mutex<EventState>,
    signal: Condvar,
}

/// A cloneable manual-reset event.
///
/// Used as the caller-supplied cancel handle for result waits, as the idle
/// signal of pools and groups, and as the lazily allocated completion handle
/// of a work item.
#[derive(Clone)]
pub struct WaitHandle {
    inner: Arc<EventInner>,
}

impl Default for WaitHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WaitHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitHandle")
            .field("signaled", &self.is_set())
            .finish()
    }
}

impl WaitHandle {
    /// Create an unsignaled handle.
    #[must_use]
    pub fn new() -> Self {
        Self::with_state(false)
    }

    /// Create a handle in the given initial state.
    #[must_use]
    pub fn with_state(signaled: bool) -> Self {
        Self {
            inner: Arc::new(EventInner {
                state: Mutex::new(EventState {
                    signaled,
                    watchers: Vec::new(),
                }),
                signal: Condvar::new(),
            }),
        }
    }

    /// Signal the handle, releasing every current and future waiter until reset.
    pub fn set(&self) {
        let watchers = {
            let mut state = self.inner.state.lock();
            if state.signaled {
                return;
            }
            state.signaled = true;
            state.watchers.clone()
        };
        self.inner.signal.notify_all();
        for watcher in watchers {
            watcher.notify();
        }
    }

    /// Return the handle to the unsignaled state.
    pub fn reset(&self) {
        self.inner.state.lock().signaled = false;
    }

    /// Whether the handle is signaled.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.inner.state.lock().signaled
    }

    /// Block until signaled or until `timeout` elapses (`None` waits forever).
    ///
    /// Returns whether the handle was signaled.
    pub fn wait_timeout(&self, timeout: Option<Duration>) -> bool {
        let deadline = deadline_after(timeout);
        let mut state = self.inner.state.lock();
        while !state.signaled {
            match deadline {
                Some(deadline) => {
                    if self.inner.signal.wait_until(&mut state, deadline).timed_out() {
                        return state.signaled;
                    }
                }
                None => self.inner.signal.wait(&mut state),
            }
        }
        true
    }

    /// Block until signaled.
    pub fn wait(&self) {
        self.wait_timeout(None);
    }

    /// Whether both values refer to the same underlying event.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn watch(&self, watcher: &Arc<Watcher>) {
        self.inner.state.lock().watchers.push(Arc::clone(watcher));
    }

    fn unwatch(&self, watcher: &Arc<Watcher>) {
        self.inner
            .state
            .lock()
            .watchers
            .retain(|w| !Arc::ptr_eq(w, watcher));
    }
}

/// Convert an optional timeout into an optional deadline.
///
/// Timeouts too large to represent are treated as infinite.
pub(crate) fn deadline_after(timeout: Option<Duration>) -> Option<Instant> {
    timeout.and_then(|t| Instant::now().checked_add(t))
}

/// Registers one watcher with a set of handles for the lifetime of the guard.
struct WatchGuard<'a> {
    handles: &'a [WaitHandle],
    watcher: Arc<Watcher>,
}

impl<'a> WatchGuard<'a> {
    fn new(handles: &'a [WaitHandle]) -> Self {
        let watcher = Arc::new(Watcher::new());
        for handle in handles {
            handle.watch(&watcher);
        }
        Self { handles, watcher }
    }
}

impl Drop for WatchGuard<'_> {
    fn drop(&mut self) {
        for handle in self.handles {
            handle.unwatch(&self.watcher);
        }
    }
}

/// Block until `ready` returns true, re-evaluating it whenever one of
/// `handles` is set. Returns `false` if `deadline` passes first.
///
/// `ready` is evaluated after the watcher is registered, so a `set` racing
/// with the check is never missed.
pub(crate) fn wait_until_ready<F>(
    handles: &[WaitHandle],
    deadline: Option<Instant>,
    mut ready: F,
) -> bool
where
    F: FnMut() -> bool,
{
    if ready() {
        return true;
    }
    let guard = WatchGuard::new(handles);
    loop {
        let seen = guard.watcher.generation();
        if ready() {
            return true;
        }
        if !guard.watcher.wait_past(seen, deadline) {
            return ready();
        }
    }
}
