//! Queue primitives used by the group workers
//!
//! - `PriorityQueue`: fixed set of FIFO buckets indexed by integer priority

mod priority_queue;

pub use priority_queue::PriorityQueue;
