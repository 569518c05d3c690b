//! In-memory priority queue of pending follow actions.

mod heap;

pub use heap::{PriorityQueue, dispatch_order};
