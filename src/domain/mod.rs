//! Domain types for skyfollow
//!
//! - CandidateAccount: an account considered for following, persisted in the store
//! - DispatchItem: the queue-resident wrapper carrying scheduling state

pub mod account;
pub mod item;

pub use account::{
    CandidateAccount, HIGH_TIER_FOLLOWERS, MEDIUM_TIER_FOLLOWERS, PRIORITY_HIGH, PRIORITY_LOW, PRIORITY_MEDIUM,
    PRIORITY_UNASSIGNED, priority_tier,
};
pub use item::DispatchItem;
