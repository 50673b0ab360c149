//! Queue backends.

pub mod blocking;
pub mod memory;

pub use blocking::BlockingQueue;
pub use memory::PriorityQueue;
