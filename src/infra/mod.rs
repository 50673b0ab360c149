//! Infrastructure: the priority queues work items wait in.

pub mod queue;

pub use queue::{BlockingQueue, PriorityQueue};
