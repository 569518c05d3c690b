//! Linear backoff retry policy for failed dispatches.

use chrono::{DateTime, Duration, Utc};

use crate::scheduler::rate_limit::saturating_add;

/// Default retry ceiling.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default base delay between attempts.
pub const DEFAULT_RETRY_DELAY_SECS: i64 = 300;

/// What to do with an item after a failed dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Put the item back, eligible again at `next_eligible`.
    Reschedule { attempts: u32, next_eligible: DateTime<Utc> },
    /// Ceiling reached; remove the item permanently.
    Drop { attempts: u32 },
}

/// Linear backoff: delay = attempts * base_delay, using the post-increment count.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::seconds(DEFAULT_RETRY_DELAY_SECS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Decide the fate of an item that had `attempts` failures before this one.
    pub fn on_failure(&self, attempts: u32, now: DateTime<Utc>) -> RetryDecision {
        let attempts = attempts.saturating_add(1).min(self.max_attempts.max(1));
        if attempts >= self.max_attempts {
            return RetryDecision::Drop { attempts };
        }
        let next_eligible = i32::try_from(attempts)
            .ok()
            .and_then(|n| self.base_delay.checked_mul(n))
            .map_or(DateTime::<Utc>::MAX_UTC, |delay| saturating_add(now, delay));
        RetryDecision::Reschedule { attempts, next_eligible }
    }
}
