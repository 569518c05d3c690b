//! Follow scheduling and dispatch.
//!
//! - **Rate governor**: global window ceiling plus cooldown between follows
//! - **Retry policy**: linear backoff with a drop ceiling
//! - **Dispatcher**: the control loop tying queue, governor, client and store
//!   together

mod dispatcher;
mod rate_limit;
mod retry;
mod status;

pub use dispatcher::{Dispatcher, DispatcherConfig, EnqueueOutcome};
pub use rate_limit::{Admission, GovernorSnapshot, RateGovernor, RateLimitConfig};
pub use retry::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY_SECS, RetryDecision, RetryPolicy};
pub use status::{DispatchCounters, DispatchStatus, DispatcherState, TickOutcome, WaitReason};
