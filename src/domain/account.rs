//! Candidate account record
//!
//! A `CandidateAccount` is one account considered for following. It lives in
//! the account store independently of whether it is currently queued.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Highest priority tier (more than 10,000 followers).
pub const PRIORITY_HIGH: u8 = 3;
/// Middle priority tier (more than 1,000 followers).
pub const PRIORITY_MEDIUM: u8 = 2;
/// Lowest priority tier.
pub const PRIORITY_LOW: u8 = 1;
/// Sentinel for "tier not assigned yet".
pub const PRIORITY_UNASSIGNED: u8 = 0;

/// Follower count above which an account lands in the high tier.
pub const HIGH_TIER_FOLLOWERS: u64 = 10_000;
/// Follower count above which an account lands in the medium tier.
pub const MEDIUM_TIER_FOLLOWERS: u64 = 1_000;

/// Map a follower count to its priority tier.
pub fn priority_tier(follower_count: u64) -> u8 {
    if follower_count > HIGH_TIER_FOLLOWERS {
        PRIORITY_HIGH
    } else if follower_count > MEDIUM_TIER_FOLLOWERS {
        PRIORITY_MEDIUM
    } else {
        PRIORITY_LOW
    }
}

/// An account the follower may target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateAccount {
    /// Natural key: "alice.bsky.social"
    pub handle: String,

    /// Decentralized identifier; empty until resolved
    #[serde(default)]
    pub identity: String,

    pub follower_count: u64,

    /// Tier in {1,2,3}; 0 until first queued
    #[serde(default)]
    pub priority: u8,

    /// Monotonic: never reset once true
    #[serde(default)]
    pub followed: bool,

    /// Failed dispatch attempts for the current pending cycle
    #[serde(default)]
    pub attempts: u32,

    pub saved_on: Option<DateTime<Utc>>,
    pub last_checked: Option<DateTime<Utc>>,
    pub follow_date: Option<DateTime<Utc>>,
}

impl CandidateAccount {
    /// Create a freshly discovered account.
    pub fn new(handle: impl Into<String>, follower_count: u64, now: DateTime<Utc>) -> Self {
        Self {
            handle: handle.into(),
            identity: String::new(),
            follower_count,
            priority: PRIORITY_UNASSIGNED,
            followed: false,
            attempts: 0,
            saved_on: Some(now),
            last_checked: None,
            follow_date: None,
        }
    }

    /// Attach a resolved identity.
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn has_identity(&self) -> bool {
        !self.identity.is_empty()
    }

    /// Assign the priority tier if none has been assigned yet.
    ///
    /// Returns true when the tier was assigned by this call. An assigned tier
    /// is never recomputed, even if the follower count changes later.
    pub fn assign_priority(&mut self) -> bool {
        if self.priority == PRIORITY_UNASSIGNED {
            self.priority = priority_tier(self.follower_count);
            true
        } else {
            false
        }
    }

    /// The assigned tier, or the tier the follower count implies.
    pub fn effective_priority(&self) -> u8 {
        if self.priority == PRIORITY_UNASSIGNED {
            priority_tier(self.follower_count)
        } else {
            self.priority
        }
    }

    /// Mark the account as followed.
    pub fn mark_followed(&mut self, now: DateTime<Utc>) {
        self.followed = true;
        self.last_checked = Some(now);
        if self.follow_date.is_none() {
            self.follow_date = Some(now);
        }
    }

    /// Whether the retry ceiling has been reached.
    pub fn is_exhausted(&self, max_attempts: u32) -> bool {
        self.attempts >= max_attempts
    }
}
