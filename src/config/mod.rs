//! Configuration models for pools, groups and multi-pool schedulers.

pub mod pool;

pub use pool::{GroupConfig, PoolConfig, SchedulerConfig, DEFAULT_IDLE_TIMEOUT_MS};
