//! Queue-resident dispatch item

use chrono::{DateTime, Utc};

use super::account::CandidateAccount;

/// A pending follow action sitting in the priority queue.
///
/// Holds a snapshot of the account plus the scheduling fields the queue
/// orders by. `position` is heap bookkeeping owned by the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchItem {
    pub account: CandidateAccount,
    pub priority: u8,
    pub attempts: u32,
    pub next_eligible: DateTime<Utc>,
    pub(crate) position: usize,
}

impl DispatchItem {
    /// Wrap an account, eligible immediately at `now`.
    pub fn new(account: CandidateAccount, now: DateTime<Utc>) -> Self {
        let priority = account.effective_priority();
        let attempts = account.attempts;
        Self {
            account,
            priority,
            attempts,
            next_eligible: now,
            position: usize::MAX,
        }
    }

    /// Override the eligible time.
    pub fn eligible_at(mut self, at: DateTime<Utc>) -> Self {
        self.next_eligible = at;
        self
    }

    pub fn handle(&self) -> &str {
        &self.account.handle
    }

    /// Whether the item may be dispatched at `now`.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.next_eligible <= now
    }
}
