//! Dispatcher state and status reporting types.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::bsky::FollowOutcome;
use crate::scheduler::rate_limit::GovernorSnapshot;

/// Where the dispatcher loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatcherState {
    /// Queue empty
    #[default]
    Idle,
    /// Top item not yet eligible, or rate/cooldown blocking
    Waiting,
    /// Follow request in flight
    Dispatching,
    /// Applying the outcome of a follow request
    Committing,
}

impl fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DispatcherState::Idle => "idle",
            DispatcherState::Waiting => "waiting",
            DispatcherState::Dispatching => "dispatching",
            DispatcherState::Committing => "committing",
        };
        write!(f, "{}", s)
    }
}

/// Why a tick did not dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitReason {
    /// Top item's eligible time is in the future
    NotEligible,
    /// Window ceiling reached
    WindowFull,
    /// Global cooldown running
    Cooldown,
}

/// Result of one dispatcher tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Nothing queued.
    Idle,
    /// Something is queued but may not go yet.
    Waiting { reason: WaitReason, until: DateTime<Utc> },
    /// Another tick is already dispatching.
    Busy,
    /// Account was already followed; no request was made.
    Skipped { handle: String },
    /// Follow committed to the store and the dedup set.
    Committed { handle: String, outcome: FollowOutcome },
    /// Failed; back in the queue.
    Rescheduled {
        handle: String,
        attempts: u32,
        next_eligible: DateTime<Utc>,
    },
    /// Failed at the retry ceiling; removed for good.
    Dropped { handle: String, attempts: u32 },
}

impl TickOutcome {
    /// Whether this tick consumed the top item.
    pub fn made_progress(&self) -> bool {
        !matches!(self, TickOutcome::Idle | TickOutcome::Waiting { .. } | TickOutcome::Busy)
    }
}

/// Running totals since the dispatcher was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchCounters {
    pub followed: usize,
    pub already_following: usize,
    pub skipped: usize,
    pub failures: usize,
    pub dropped: usize,
}

/// Snapshot for the operator surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchStatus {
    pub state: DispatcherState,
    pub queued: usize,
    pub in_flight: Option<String>,
    pub counters: DispatchCounters,
    pub governor: GovernorSnapshot,
    /// Reason of the most recent drop, per handle
    pub drop_reasons: BTreeMap<String, String>,
    pub simulate: bool,
}
