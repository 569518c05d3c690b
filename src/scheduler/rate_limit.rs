//! Global follow throughput governor.
//!
//! Two limits apply to every successful follow, regardless of which account
//! it targets:
//! - a ceiling on follows per rolling window (default 50 per hour)
//! - a cooldown between any two follows (default 24 hours)
//!
//! The window resets lazily: nothing runs on a timer, the reset happens the
//! next time a success is recorded after `window_reset` has passed.
//!
//! Durations too large to add to a timestamp saturate at the latest
//! representable time.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Rate governor configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Maximum successful follows per window.
    pub max_per_window: u32,
    /// Window length.
    pub window: Duration,
    /// Minimum spacing between two successful follows.
    pub cooldown: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_window: 50,
            window: Duration::hours(1),
            cooldown: Duration::hours(24),
        }
    }
}

impl RateLimitConfig {
    pub fn new(max_per_window: u32, window: Duration, cooldown: Duration) -> Self {
        Self {
            max_per_window,
            window,
            cooldown,
        }
    }
}

/// Verdict of a dispatch admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Admission {
    Allowed,
    /// Window ceiling reached; wait until the window resets.
    WindowFull { until: DateTime<Utc> },
    /// Global cooldown since the last follow is still running.
    Cooldown { until: DateTime<Utc> },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

/// `at + by`, or the latest representable time on overflow.
pub(crate) fn saturating_add(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    at.checked_add_signed(by).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Point-in-time view of the governor for status reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GovernorSnapshot {
    pub window_count: u32,
    pub max_per_window: u32,
    pub window_reset: DateTime<Utc>,
    pub last_follow_at: Option<DateTime<Utc>>,
}

/// Global rate and cooldown state.
#[derive(Debug, Clone)]
pub struct RateGovernor {
    config: RateLimitConfig,
    /// Successful follows in the current window.
    window_count: u32,
    /// When the current window ends.
    window_reset: DateTime<Utc>,
    /// Most recent successful follow.
    last_follow_at: Option<DateTime<Utc>>,
}

impl RateGovernor {
    /// Create a governor whose first window starts at `now`.
    pub fn new(config: RateLimitConfig, now: DateTime<Utc>) -> Self {
        let window_reset = saturating_add(now, config.window);
        Self {
            config,
            window_count: 0,
            window_reset,
            last_follow_at: None,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn window_count(&self) -> u32 {
        self.window_count
    }

    pub fn window_reset(&self) -> DateTime<Utc> {
        self.window_reset
    }

    pub fn last_follow_at(&self) -> Option<DateTime<Utc>> {
        self.last_follow_at
    }

    /// Check whether a follow may be dispatched at `now`. Never mutates state.
    pub fn check(&self, now: DateTime<Utc>) -> Admission {
        if self.window_count >= self.config.max_per_window && now < self.window_reset {
            return Admission::WindowFull {
                until: self.window_reset,
            };
        }

        if let Some(last) = self.last_follow_at {
            let until = saturating_add(last, self.config.cooldown);
            if now < until {
                return Admission::Cooldown { until };
            }
        }

        Admission::Allowed
    }

    pub fn can_dispatch(&self, now: DateTime<Utc>) -> bool {
        self.check(now).is_allowed()
    }

    /// Record a successful follow at `now`.
    ///
    /// If the window has expired, the count restarts and `window_reset`
    /// advances by whole window lengths until it lies after `now`.
    pub fn record_success(&mut self, now: DateTime<Utc>) {
        if now >= self.window_reset {
            self.window_count = 0;
            self.advance_window(now);
        }
        self.window_count += 1;
        self.last_follow_at = Some(now);

        log::debug!(
            "Follow recorded: {}/{} in window ending {}",
            self.window_count,
            self.config.max_per_window,
            self.window_reset
        );
    }

    pub fn snapshot(&self) -> GovernorSnapshot {
        GovernorSnapshot {
            window_count: self.window_count,
            max_per_window: self.config.max_per_window,
            window_reset: self.window_reset,
            last_follow_at: self.last_follow_at,
        }
    }

    fn advance_window(&mut self, now: DateTime<Utc>) {
        let window_ms = self.config.window.num_milliseconds();
        if window_ms <= 0 {
            self.window_reset = now;
            return;
        }
        let elapsed_ms = (now - self.window_reset).num_milliseconds();
        let windows = elapsed_ms / window_ms + 1;
        self.window_reset = match windows.checked_mul(window_ms) {
            Some(ms) => saturating_add(self.window_reset, Duration::milliseconds(ms)),
            None => DateTime::<Utc>::MAX_UTC,
        };
    }
}
