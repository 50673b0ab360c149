//! # Prometheus Thread Pool
//!
//! A prioritized worker thread pool with bounded work item groups.
//!
//! Work items are queued with one of five priorities and executed by a pool of
//! OS threads that grows on demand up to a maximum and shrinks back to a
//! minimum after an idle timeout. Every submission returns a
//! [`WorkItemHandle`](core::WorkItemHandle) used to wait for the result,
//! cancel the item while it is still queued, or inspect its timing.
//!
//! ## Key Features
//!
//! - **Priority queue**: Highest priority first, FIFO within a priority
//! - **Dynamic threads**: Grow on demand, retire idle threads above the minimum
//! - **Work item groups**: Virtual sub-pools that cap concurrency, with O(1)
//!   mass cancellation of everything they have queued
//! - **Result handles**: Blocking waits with timeout and an external cancel
//!   handle; callback errors and panics are captured, never crash a worker
//! - **Multi-waits**: [`wait_all`](core::wait_all) and [`wait_any`](core::wait_any)
//!   over any number of handles
//! - **Post-execute callbacks**: Fired after execution or cancellation per policy
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use prometheus_thread_pool::config::{GroupConfig, PoolConfig};
//! use prometheus_thread_pool::core::{wait_all, ThreadPool, WorkScheduler};
//! use prometheus_thread_pool::util::serde::Priority;
//!
//! let pool = ThreadPool::new(PoolConfig::new().with_name("ingest").with_max_threads(8))?;
//!
//! // At most two of these run at once.
//! let group = pool.create_group(GroupConfig::new(2))?;
//! let handles: Vec<_> = (0..10)
//!     .map(|i| group.submit(move |_ctx| Ok(i * 2)))
//!     .collect::<Result<_, _>>()?;
//!
//! let urgent = pool.submit_with_priority(|_ctx| Ok(-1), Priority::Highest)?;
//!
//! assert!(wait_all(&handles, Some(Duration::from_secs(10)), None));
//! assert_eq!(urgent.get_result()?, -1);
//! pool.shutdown();
//! # Ok::<(), prometheus_thread_pool::core::PoolError>(())
//! ```
//!
//! For complete examples, see the integration tests under `tests/`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling: work items, result handles, the thread pool and groups.
pub mod core;
/// Configuration models for pools, groups and multi-pool schedulers.
pub mod config;
/// Builders to construct thread pools from configuration.
pub mod builders;
/// Infrastructure: the priority queues work items wait in.
pub mod infra;
/// Runtime adapters bridging blocking waits into async code.
pub mod runtime;
/// Shared utilities.
pub mod util;
