//! skyfollow - rate-limited follow dispatch for Bluesky
//!
//! Candidate accounts live in a durable store. A producer loads them into a
//! priority queue, and a single dispatcher loop follows them one at a time
//! under a global rate window, a cooldown between follows and a linear
//! backoff retry policy.

pub mod bsky;
pub mod clock;
pub mod domain;
pub mod error;
pub mod producer;
pub mod queue;
pub mod scheduler;
pub mod store;

pub use error::{FollowError, Result};
