//! Error types for pool, group and work item operations.

use std::sync::Arc;

use thiserror::Error;

/// Shared cause of a faulted work item.
///
/// Shared so a result handle can report the same fault to every caller that
/// retrieves it.
pub type FaultCause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by the thread pool, work item groups and result handles.
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    /// The work item was canceled before it ran.
    #[error("work item canceled")]
    Canceled,
    /// The caller stopped waiting; the item may still be running.
    #[error("work item timed out")]
    TimedOut,
    /// The callback returned an error or panicked.
    #[error("work item faulted: {0}")]
    Faulted(#[source] FaultCause),
    /// The pool has been shut down and rejects new work.
    #[error("pool is shutting down")]
    ShuttingDown,
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Waiting would block the thread the wait depends on.
    #[error("deadlock: {0}")]
    Deadlock(String),
    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
    /// Internal error (background waiter panicked, runtime gone, etc.).
    #[error("internal error: {0}")]
    Internal(String),
}

impl PoolError {
    /// Whether this is [`PoolError::Canceled`].
    #[must_use]
    pub const fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Whether this is [`PoolError::TimedOut`].
    #[must_use]
    pub const fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }

    /// The captured callback error, if this is [`PoolError::Faulted`].
    #[must_use]
    pub fn fault(&self) -> Option<&FaultCause> {
        match self {
            Self::Faulted(cause) => Some(cause),
            _ => None,
        }
    }
}

/// A work item callback panicked; the panic payload is kept as text.
#[derive(Debug, Clone, Error)]
#[error("work item panicked: {message}")]
pub struct PanicFault {
    /// Panic message, or a placeholder for non-string payloads.
    pub message: String,
}

impl PanicFault {
    /// Build from a payload returned by `std::panic::catch_unwind`.
    pub(crate) fn from_payload(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self { message }
    }
}

/// Application-facing result using anyhow for work item callbacks.
pub type AppResult<T> = Result<T, anyhow::Error>;
