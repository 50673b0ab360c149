//! Runtime adapters bridging blocking waits into async code.

#[cfg(feature = "tokio-runtime")]
pub mod tokio_wait;
