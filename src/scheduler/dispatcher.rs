//! Follow dispatcher.
//!
//! One `Dispatcher` owns the priority queue, the rate governor and the
//! in-memory dedup set behind a single lock. Producers call `enqueue`; the
//! control loop calls `tick` (or `run`, which is `tick` plus polling and
//! shutdown). The lock is held only for structural changes, never across a
//! network call or a store write.
//!
//! A tick, in order:
//! 1. peek the top item; wait if it is not eligible yet
//! 2. skip it if the dedup set already has its handle
//! 3. wait if the rate governor denies dispatch
//! 4. pop it, then skip it if the store says it is followed
//! 5. resolve its identity if needed; skip it if that identity is followed
//!    under another handle; then follow
//! 6. commit (store first, then memory) or hand it to the retry policy
//!
//! A blocked top item blocks the whole queue, even when a lower item is
//! ready; ordering is strictly the queue order.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::watch;

use crate::bsky::{FollowClient, FollowOutcome, Session};
use crate::clock::Clock;
use crate::domain::{CandidateAccount, DispatchItem};
use crate::error::{FollowError, Result};
use crate::queue::PriorityQueue;
use crate::scheduler::rate_limit::{Admission, RateGovernor, RateLimitConfig};
use crate::scheduler::retry::{RetryDecision, RetryPolicy};
use crate::scheduler::status::{DispatchCounters, DispatchStatus, DispatcherState, TickOutcome, WaitReason};
use crate::store::AccountStore;

/// Engine tunables. Every limit is injected so tests can compress time.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub rate: RateLimitConfig,
    pub retry: RetryPolicy,
    /// Sleep between ticks while waiting on eligibility or the governor
    pub poll_interval: Duration,
    /// Sleep between ticks while the queue is empty
    pub idle_poll: Duration,
    /// Pass-through to the follow client; no remote mutation when set
    pub simulate: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            rate: RateLimitConfig::default(),
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_secs(1),
            idle_poll: Duration::from_secs(60),
            simulate: true,
        }
    }
}

/// Result of handing an account to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Already in the queue or currently being dispatched
    AlreadyQueued,
    /// Followed per the account record or the dedup set
    AlreadyFollowed,
    /// Attempts already at the retry ceiling
    Exhausted,
}

struct DispatchState {
    queue: PriorityQueue,
    governor: RateGovernor,
    followed: HashSet<String>,
    drop_reasons: BTreeMap<String, String>,
    counters: DispatchCounters,
    state: DispatcherState,
    in_flight: Option<String>,
}

/// The dispatch engine.
pub struct Dispatcher {
    config: DispatcherConfig,
    client: Arc<dyn FollowClient>,
    store: Arc<dyn AccountStore>,
    clock: Arc<dyn Clock>,
    inner: Mutex<DispatchState>,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        client: Arc<dyn FollowClient>,
        store: Arc<dyn AccountStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let governor = RateGovernor::new(config.rate.clone(), clock.now());
        Self {
            config,
            client,
            store,
            clock,
            inner: Mutex::new(DispatchState {
                queue: PriorityQueue::new(),
                governor,
                followed: HashSet::new(),
                drop_reasons: BTreeMap::new(),
                counters: DispatchCounters::default(),
                state: DispatcherState::Idle,
                in_flight: None,
            }),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    // State stays structurally valid between statements, so a poisoned
    // lock is recovered rather than propagated.
    fn lock(&self) -> MutexGuard<'_, DispatchState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add an account to the queue, eligible now.
    ///
    /// Assigns the priority tier if the account has none. The caller is
    /// responsible for persisting that assignment. Accounts at the retry
    /// ceiling are refused until their attempts are reset.
    pub fn enqueue(&self, mut account: CandidateAccount) -> EnqueueOutcome {
        if account.followed {
            return EnqueueOutcome::AlreadyFollowed;
        }
        if account.is_exhausted(self.config.retry.max_attempts) {
            return EnqueueOutcome::Exhausted;
        }
        account.assign_priority();
        let now = self.clock.now();

        let mut s = self.lock();
        if s.followed.contains(&account.handle) {
            return EnqueueOutcome::AlreadyFollowed;
        }
        if s.in_flight.as_deref() == Some(account.handle.as_str()) || s.queue.contains(&account.handle) {
            return EnqueueOutcome::AlreadyQueued;
        }

        let handle = account.handle.clone();
        match s.queue.push(DispatchItem::new(account, now)) {
            Ok(()) => {
                debug!("Queued {} ({} pending)", handle, s.queue.len());
                EnqueueOutcome::Queued
            }
            Err(e) => {
                warn!("Could not queue {}: {}", handle, e);
                EnqueueOutcome::AlreadyQueued
            }
        }
    }

    /// Make a queued item eligible immediately. Priority is unchanged.
    pub fn retry_now(&self, handle: &str) -> Result<()> {
        let now = self.clock.now();
        let mut s = self.lock();
        let priority = s
            .queue
            .get(handle)
            .map(|item| item.priority)
            .ok_or_else(|| FollowError::NotQueued(handle.to_string()))?;
        s.queue.reprioritize(handle, priority, now)?;
        info!("Retry requested for {}", handle);
        Ok(())
    }

    /// Reason of the most recent permanent drop for `handle`.
    pub fn drop_reason(&self, handle: &str) -> Option<String> {
        self.lock().drop_reasons.get(handle).cloned()
    }

    /// Whether `handle` is in the dedup set.
    pub fn is_followed(&self, handle: &str) -> bool {
        self.lock().followed.contains(handle)
    }

    pub fn queued_len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Queued items in dispatch order.
    pub fn pending(&self) -> Vec<DispatchItem> {
        self.lock().queue.sorted().into_iter().cloned().collect()
    }

    pub fn status(&self) -> DispatchStatus {
        let s = self.lock();
        DispatchStatus {
            state: s.state,
            queued: s.queue.len(),
            in_flight: s.in_flight.clone(),
            counters: s.counters,
            governor: s.governor.snapshot(),
            drop_reasons: s.drop_reasons.clone(),
            simulate: self.config.simulate,
        }
    }

    fn set_state(&self, state: DispatcherState) {
        self.lock().state = state;
    }

    /// Run one pass of the dispatch state machine.
    pub async fn tick(&self, session: &Session) -> TickOutcome {
        let now = self.clock.now();

        let item = {
            let mut s = self.lock();
            if s.in_flight.is_some() {
                return TickOutcome::Busy;
            }

            let (handle, ready, next_eligible) = match s.queue.peek() {
                Some(top) => (top.handle().to_string(), top.is_ready(now), top.next_eligible),
                None => {
                    s.state = DispatcherState::Idle;
                    return TickOutcome::Idle;
                }
            };

            if !ready {
                s.state = DispatcherState::Waiting;
                return TickOutcome::Waiting {
                    reason: WaitReason::NotEligible,
                    until: next_eligible,
                };
            }

            if s.followed.contains(&handle) {
                s.queue.pop();
                s.counters.skipped += 1;
                debug!("Skipping {}: followed earlier this run", handle);
                return TickOutcome::Skipped { handle };
            }

            match s.governor.check(now) {
                Admission::Allowed => {}
                Admission::WindowFull { until } => {
                    s.state = DispatcherState::Waiting;
                    return TickOutcome::Waiting {
                        reason: WaitReason::WindowFull,
                        until,
                    };
                }
                Admission::Cooldown { until } => {
                    s.state = DispatcherState::Waiting;
                    return TickOutcome::Waiting {
                        reason: WaitReason::Cooldown,
                        until,
                    };
                }
            }

            let Some(item) = s.queue.pop() else {
                s.state = DispatcherState::Idle;
                return TickOutcome::Idle;
            };
            s.in_flight = Some(handle);
            s.state = DispatcherState::Dispatching;
            item
        };

        let outcome = self.dispatch(session, item).await;

        {
            let mut s = self.lock();
            s.in_flight = None;
            s.state = if s.queue.is_empty() {
                DispatcherState::Idle
            } else {
                DispatcherState::Waiting
            };
        }
        outcome
    }

    async fn dispatch(&self, session: &Session, mut item: DispatchItem) -> TickOutcome {
        let handle = item.account.handle.clone();

        match self.store.get(&handle) {
            Ok(Some(stored)) if stored.followed => {
                let mut s = self.lock();
                s.followed.insert(handle.clone());
                s.counters.skipped += 1;
                debug!("Skipping {}: already followed per store", handle);
                return TickOutcome::Skipped { handle };
            }
            Ok(Some(stored)) => {
                if !item.account.has_identity() && stored.has_identity() {
                    item.account.identity = stored.identity;
                }
            }
            Ok(None) => {}
            Err(e) => return self.fail(item, e),
        }

        if !item.account.has_identity() {
            match self.client.resolve_identity(session, &handle).await {
                Ok(identity) => {
                    debug!("Resolved {} to {}", handle, identity);
                    item.account.identity = identity;
                }
                Err(e) => return self.fail(item, e),
            }
        }

        // Same account seen earlier under another handle
        match self.store.get_by_identity(&item.account.identity) {
            Ok(Some(stored)) if stored.followed => {
                let mut s = self.lock();
                s.followed.insert(handle.clone());
                s.counters.skipped += 1;
                debug!(
                    "Skipping {}: {} already followed as {}",
                    handle, item.account.identity, stored.handle
                );
                return TickOutcome::Skipped { handle };
            }
            Ok(_) => {}
            Err(e) => return self.fail(item, e),
        }

        let result = self
            .client
            .follow_account(session, &item.account.identity, self.config.simulate)
            .await;
        self.set_state(DispatcherState::Committing);

        match result {
            Ok(outcome) => self.commit(item, outcome),
            Err(e) => self.fail(item, e),
        }
    }

    /// Store first; memory only once the store agrees.
    fn commit(&self, item: DispatchItem, outcome: FollowOutcome) -> TickOutcome {
        let now = self.clock.now();
        let handle = item.account.handle.clone();

        let mut account = item.account.clone();
        account.priority = item.priority;
        account.attempts = item.attempts;
        account.mark_followed(now);

        if let Err(e) = self.store.upsert(&account) {
            error!("Follow of {} not persisted: {}", handle, e);
            return self.fail(item, e);
        }

        let (window_count, max_per_window) = {
            let mut s = self.lock();
            s.followed.insert(handle.clone());
            match outcome {
                FollowOutcome::Followed => {
                    s.governor.record_success(now);
                    s.counters.followed += 1;
                }
                FollowOutcome::AlreadyFollowing => {
                    s.counters.already_following += 1;
                }
            }
            (s.governor.window_count(), s.governor.config().max_per_window)
        };

        info!(
            target: "audit",
            "follow committed handle={} identity={} outcome={:?} priority={} attempts={} simulate={} window={}/{}",
            handle,
            account.identity,
            outcome,
            item.priority,
            item.attempts,
            self.config.simulate,
            window_count,
            max_per_window
        );

        TickOutcome::Committed { handle, outcome }
    }

    /// Apply the retry policy to a failed item.
    fn fail(&self, mut item: DispatchItem, err: FollowError) -> TickOutcome {
        let now = self.clock.now();
        let handle = item.account.handle.clone();

        if err.is_retryable() {
            warn!("Follow of {} failed (attempt {}): {}", handle, item.attempts + 1, err);
        } else {
            error!("Follow of {} failed (attempt {}): {}", handle, item.attempts + 1, err);
        }

        let decision = self.config.retry.on_failure(item.attempts, now);
        let attempts = match decision {
            RetryDecision::Reschedule { attempts, .. } | RetryDecision::Drop { attempts } => attempts,
        };

        let mut account = item.account.clone();
        account.priority = item.priority;
        account.attempts = attempts;
        account.last_checked = Some(now);

        let outcome = {
            let mut s = self.lock();
            s.counters.failures += 1;
            match decision {
                RetryDecision::Reschedule { attempts, next_eligible } => {
                    item.attempts = attempts;
                    item.account.attempts = attempts;
                    if let Err(e) = s.queue.push(item.eligible_at(next_eligible)) {
                        warn!("Could not requeue {}: {}", handle, e);
                    }
                    TickOutcome::Rescheduled {
                        handle: handle.clone(),
                        attempts,
                        next_eligible,
                    }
                }
                RetryDecision::Drop { attempts } => {
                    s.drop_reasons.insert(handle.clone(), err.to_string());
                    s.counters.dropped += 1;
                    TickOutcome::Dropped {
                        handle: handle.clone(),
                        attempts,
                    }
                }
            }
        };

        if let TickOutcome::Dropped { attempts, .. } = &outcome {
            warn!(
                target: "audit",
                "follow dropped handle={} attempts={} reason={}",
                handle,
                attempts,
                err
            );
        }

        if let Err(e) = self.store.upsert(&account) {
            warn!("Could not record attempt {} for {}: {}", attempts, handle, e);
        }

        outcome
    }

    /// Tick until `shutdown` turns true.
    ///
    /// The flag is checked between ticks only, so an in-flight follow always
    /// finishes its commit or reschedule before the loop exits.
    pub async fn run(&self, session: &Session, mut shutdown: watch::Receiver<bool>) -> DispatchStatus {
        info!(
            "Dispatcher started: {} queued, {}/window, simulate={}",
            self.queued_len(),
            self.config.rate.max_per_window,
            self.config.simulate
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let outcome = self.tick(session).await;
            if outcome.made_progress() {
                continue;
            }
            let delay = match outcome {
                TickOutcome::Idle => self.config.idle_poll,
                TickOutcome::Waiting { reason, until } => {
                    debug!("Waiting ({:?}) until {}", reason, until);
                    self.config.poll_interval
                }
                _ => self.config.poll_interval,
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        let status = self.status();
        info!(
            "Dispatcher stopped: {} followed, {} dropped, {} still queued",
            status.counters.followed, status.counters.dropped, status.queued
        );
        status
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("queued", &self.queued_len())
            .finish_non_exhaustive()
    }
}
