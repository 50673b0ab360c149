//! Blocking priority queue that worker threads dequeue from.
//!
//! `dequeue` parks the calling thread on a `parking_lot::Condvar` until an
//! item arrives, the timeout elapses, or the queue is shut down. A `None`
//! result is the normal way an idle worker learns it may retire.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::memory::PriorityQueue;
use crate::util::serde::Priority;

struct QueueState<T> {
    items: PriorityQueue<T>,
    shutdown: bool,
    /// Threads currently parked in `dequeue`.
    waiters: usize,
}

/// Priority queue with blocking, timed dequeue and a shutdown signal.
pub struct BlockingQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
    /// Items handed out by `dequeue` and not yet marked done. Incremented
    /// while the state lock is held so `load` never misses an item moving
    /// from queued to in flight; decremented without it.
    in_flight: AtomicUsize,
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BlockingQueue<T> {
    /// Create an empty, open queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: PriorityQueue::new(),
                shutdown: false,
                waiters: 0,
            }),
            available: Condvar::new(),
            in_flight: AtomicUsize::new(0),
        }
    }

    fn take(&self, state: &mut QueueState<T>) -> Option<T> {
        let item = state.items.dequeue()?;
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        Some(item)
    }

    /// Push an item and wake one waiting thread.
    ///
    /// # Errors
    ///
    /// Returns the item back if the queue has been shut down.
    pub fn enqueue(&self, priority: Priority, item: T) -> Result<(), T> {
        let mut state = self.state.lock();
        if state.shutdown {
            return Err(item);
        }
        state.items.enqueue(priority, item);
        let wake = state.waiters > 0;
        drop(state);
        if wake {
            self.available.notify_one();
        }
        Ok(())
    }

    /// Pop the next item, blocking up to `timeout`.
    ///
    /// Returns `None` when the timeout elapses or the queue is shut down. A
    /// returned item counts as in flight until [`done`](Self::done) is called.
    pub fn dequeue(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return None;
            }
            if let Some(item) = self.take(&mut state) {
                return Some(item);
            }

            state.waiters += 1;
            let timed_out = match deadline {
                Some(deadline) => self.available.wait_until(&mut state, deadline).timed_out(),
                None => {
                    self.available.wait(&mut state);
                    false
                }
            };
            state.waiters -= 1;

            if timed_out {
                if state.shutdown {
                    return None;
                }
                return self.take(&mut state);
            }
        }
    }

    /// Mark one dequeued item as finished.
    pub fn done(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Dequeued items not yet marked done.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Queued plus in-flight items.
    #[must_use]
    pub fn load(&self) -> usize {
        let state = self.state.lock();
        state.items.len() + self.in_flight.load(Ordering::Acquire)
    }

    /// Close the queue, wake every waiter, and hand back whatever was still queued.
    pub fn shutdown(&self) -> Vec<T> {
        let mut state = self.state.lock();
        state.shutdown = true;
        let remaining = state.items.drain();
        drop(state);
        self.available.notify_all();
        remaining
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether no items are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }
}
