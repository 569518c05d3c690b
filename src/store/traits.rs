//! Persistence contract for candidate accounts.

use serde::Serialize;

use crate::domain::CandidateAccount;
use crate::error::Result;

/// Aggregate counts for the operator status view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccountCounts {
    pub total: usize,
    pub followed: usize,
    /// Not followed and still under the retry ceiling
    pub pending: usize,
    /// Not followed and at or above the retry ceiling
    pub exhausted: usize,
}

/// Durable store of candidate accounts keyed by handle.
pub trait AccountStore: Send + Sync {
    /// Load every stored account.
    fn load_all(&self) -> Result<Vec<CandidateAccount>>;

    /// Look up one account by handle.
    fn get(&self, handle: &str) -> Result<Option<CandidateAccount>>;

    /// Look up an account by resolved identity. An empty identity matches nothing.
    fn get_by_identity(&self, identity: &str) -> Result<Option<CandidateAccount>>;

    /// Insert or update by handle.
    ///
    /// Must never turn a stored `followed = true` back into false, and never
    /// lowers a stored attempt count.
    fn upsert(&self, account: &CandidateAccount) -> Result<()>;

    /// Set the attempt count of `handle` back to zero.
    fn reset_attempts(&self, handle: &str) -> Result<()>;

    /// Count accounts by state, given the retry ceiling.
    fn counts(&self, max_attempts: u32) -> Result<AccountCounts> {
        let mut counts = AccountCounts::default();
        for account in self.load_all()? {
            counts.total += 1;
            if account.followed {
                counts.followed += 1;
            } else if account.is_exhausted(max_attempts) {
                counts.exhausted += 1;
            } else {
                counts.pending += 1;
            }
        }
        Ok(counts)
    }
}
