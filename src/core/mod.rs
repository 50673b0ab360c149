//! Core scheduling: work items, result handles, the thread pool and groups.

pub mod error;
pub mod group;
pub mod result;
pub mod scheduler;
pub mod thread_pool;
pub mod wait;
pub mod wait_handle;
pub mod work_item;

pub use error::{AppResult, FaultCause, PanicFault, PoolError};
pub use group::{GroupId, IdleCallback, WorkItemsGroup};
pub use result::WorkItemHandle;
pub use scheduler::WorkScheduler;
pub use thread_pool::{PoolStats, ShutdownReport, ThreadPool, WorkerHook, WorkerHooks, WorkerInfo};
pub use wait::{wait_all, wait_any, WaitLease, WaitableResult, MAX_WAIT_HANDLES};
pub use wait_handle::WaitHandle;
pub use work_item::{
    ContextCapture, ContextSnapshot, PostExecuteCallback, WorkItemContext, WorkItemOptions,
    WorkItemState,
};
