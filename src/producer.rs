//! Producer side: discovering candidates and feeding the dispatcher.
//!
//! Producers only ever push into the dispatcher and write account records.
//! They never pop or reorder queued items.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::bsky::{DirectoryClient, Session};
use crate::clock::Clock;
use crate::domain::CandidateAccount;
use crate::error::{FollowError, Result};
use crate::scheduler::{Dispatcher, EnqueueOutcome};
use crate::store::AccountStore;

/// Discovery settings.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Page size requested from the suggestions endpoint
    pub suggestions_limit: u32,
    /// Used when the directory yields nothing
    pub fallback_handles: Vec<String>,
    /// Pause between profile lookups
    pub delay: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            suggestions_limit: 50,
            fallback_handles: Vec::new(),
            delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryReport {
    pub candidates: usize,
    pub saved: usize,
    pub failed: usize,
}

/// Finds candidate accounts and records their follower counts.
pub struct Discovery {
    directory: Arc<dyn DirectoryClient>,
    store: Arc<dyn AccountStore>,
    clock: Arc<dyn Clock>,
    config: DiscoveryConfig,
}

impl Discovery {
    pub fn new(
        directory: Arc<dyn DirectoryClient>,
        store: Arc<dyn AccountStore>,
        clock: Arc<dyn Clock>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            directory,
            store,
            clock,
            config,
        }
    }

    /// Candidate handles: suggestions, or the fallback list when there are none.
    pub async fn candidate_handles(&self, session: &Session) -> Result<Vec<String>> {
        let suggested = match self
            .directory
            .suggested_handles(session, self.config.suggestions_limit)
            .await
        {
            Ok(handles) => handles,
            Err(e) => {
                log::warn!("Fetching suggestions failed: {}", e);
                Vec::new()
            }
        };

        if !suggested.is_empty() {
            return Ok(suggested);
        }
        if self.config.fallback_handles.is_empty() {
            return Err(FollowError::Config(
                "no handles found and no fallback handles configured".to_string(),
            ));
        }
        log::info!("No suggested handles, using {} fallback handles", self.config.fallback_handles.len());
        Ok(self.config.fallback_handles.clone())
    }

    /// Fetch follower counts for every candidate and save them.
    ///
    /// Per-handle failures are logged and skipped. Existing records keep
    /// their followed flag, attempts and priority tier.
    pub async fn run(&self, session: &Session) -> Result<DiscoveryReport> {
        let handles = self.candidate_handles(session).await?;
        let mut report = DiscoveryReport {
            candidates: handles.len(),
            ..Default::default()
        };

        for (i, handle) in handles.iter().enumerate() {
            if i > 0 && !self.config.delay.is_zero() {
                tokio::time::sleep(self.config.delay).await;
            }

            let followers = match self.directory.follower_count(session, handle).await {
                Ok(count) => count,
                Err(e) => {
                    log::warn!("Skipping {}: profile lookup failed: {}", handle, e);
                    report.failed += 1;
                    continue;
                }
            };

            let now = self.clock.now();
            let account = match self.store.get(handle)? {
                Some(mut existing) => {
                    existing.follower_count = followers;
                    existing.last_checked = Some(now);
                    existing
                }
                None => CandidateAccount::new(handle.clone(), followers, now),
            };
            self.store.upsert(&account)?;
            report.saved += 1;
            log::debug!("Saved {} with {} followers", handle, followers);
        }

        log::info!(
            "Discovery saved {} of {} candidates ({} failed)",
            report.saved,
            report.candidates,
            report.failed
        );
        Ok(report)
    }
}

impl std::fmt::Debug for Discovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Discovery").field("config", &self.config).finish_non_exhaustive()
    }
}

/// Which stored accounts to enqueue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueFilter {
    pub min_followers: u64,
    /// Give accounts at the retry ceiling a fresh set of attempts
    pub retry_exhausted: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EnqueueReport {
    pub loaded: usize,
    pub queued: usize,
    pub already_queued: usize,
    pub already_followed: usize,
    pub below_min: usize,
    pub exhausted: usize,
}

/// Load accounts from the store and enqueue the eligible ones.
///
/// Newly assigned priority tiers (and reset attempts) are written back
/// before the account is queued.
pub fn enqueue_from_store(
    store: &dyn AccountStore,
    dispatcher: &Dispatcher,
    filter: EnqueueFilter,
) -> Result<EnqueueReport> {
    let max_attempts = dispatcher.config().retry.max_attempts;
    let accounts = store.load_all()?;
    let mut report = EnqueueReport {
        loaded: accounts.len(),
        ..Default::default()
    };

    for mut account in accounts {
        if account.followed {
            report.already_followed += 1;
            continue;
        }
        if account.follower_count < filter.min_followers {
            report.below_min += 1;
            continue;
        }

        if account.is_exhausted(max_attempts) {
            if !filter.retry_exhausted {
                report.exhausted += 1;
                continue;
            }
            store.reset_attempts(&account.handle)?;
            account.attempts = 0;
            log::info!("Reset attempts for {}", account.handle);
        }
        if account.assign_priority() {
            store.upsert(&account)?;
        }

        match dispatcher.enqueue(account) {
            EnqueueOutcome::Queued => report.queued += 1,
            EnqueueOutcome::AlreadyQueued => report.already_queued += 1,
            EnqueueOutcome::AlreadyFollowed => report.already_followed += 1,
            EnqueueOutcome::Exhausted => report.exhausted += 1,
        }
    }

    log::info!(
        "Enqueued {} of {} stored accounts ({} followed, {} below minimum, {} exhausted)",
        report.queued,
        report.loaded,
        report.already_followed,
        report.below_min,
        report.exhausted
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bsky::{FollowClient, FollowOutcome};
    use crate::clock::ManualClock;
    use crate::scheduler::DispatcherConfig;
    use crate::store::SqliteAccountStore;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::HashMap;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap()
    }

    fn session() -> Session {
        Session {
            access_jwt: "jwt".to_string(),
            did: "did:plc:me".to_string(),
            handle: "me.test".to_string(),
        }
    }

    struct StubDirectory {
        suggestions: Result<Vec<String>>,
        counts: HashMap<String, u64>,
    }

    impl StubDirectory {
        fn new(suggestions: Vec<&str>, counts: &[(&str, u64)]) -> Self {
            Self {
                suggestions: Ok(suggestions.into_iter().map(String::from).collect()),
                counts: counts.iter().map(|(h, c)| (h.to_string(), *c)).collect(),
            }
        }
    }

    #[async_trait]
    impl DirectoryClient for StubDirectory {
        async fn suggested_handles(&self, _session: &Session, _limit: u32) -> Result<Vec<String>> {
            match &self.suggestions {
                Ok(handles) => Ok(handles.clone()),
                Err(_) => Err(FollowError::Api {
                    status: 502,
                    message: "bad gateway".to_string(),
                }),
            }
        }

        async fn follower_count(&self, _session: &Session, actor: &str) -> Result<u64> {
            self.counts.get(actor).copied().ok_or(FollowError::Api {
                status: 400,
                message: "profile not found".to_string(),
            })
        }
    }

    struct NoopClient;

    #[async_trait]
    impl FollowClient for NoopClient {
        async fn follow_account(&self, _session: &Session, _identity: &str, _simulate: bool) -> Result<FollowOutcome> {
            Ok(FollowOutcome::Followed)
        }

        async fn resolve_identity(&self, _session: &Session, handle: &str) -> Result<String> {
            Ok(format!("did:plc:{}", handle))
        }
    }

    fn discovery(directory: StubDirectory, store: Arc<SqliteAccountStore>, fallback: Vec<&str>) -> Discovery {
        Discovery::new(
            Arc::new(directory),
            store,
            Arc::new(ManualClock::new(t0())),
            DiscoveryConfig {
                suggestions_limit: 50,
                fallback_handles: fallback.into_iter().map(String::from).collect(),
                delay: Duration::ZERO,
            },
        )
    }

    #[tokio::test]
    async fn test_discovery_saves_profiles() {
        let store = Arc::new(SqliteAccountStore::open_in_memory().unwrap());
        let directory = StubDirectory::new(vec!["a", "b", "missing"], &[("a", 20_000), ("b", 10)]);
        let report = discovery(directory, store.clone(), vec![]).run(&session()).await.unwrap();

        assert_eq!(
            report,
            DiscoveryReport {
                candidates: 3,
                saved: 2,
                failed: 1
            }
        );
        assert_eq!(store.get("a").unwrap().unwrap().follower_count, 20_000);
        assert!(store.get("missing").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_discovery_uses_fallback() {
        let store = Arc::new(SqliteAccountStore::open_in_memory().unwrap());
        let directory = StubDirectory::new(vec![], &[("fallback.test", 5)]);
        let report = discovery(directory, store.clone(), vec!["fallback.test"])
            .run(&session())
            .await
            .unwrap();
        assert_eq!(report.saved, 1);
    }

    #[tokio::test]
    async fn test_discovery_fallback_on_error() {
        let store = Arc::new(SqliteAccountStore::open_in_memory().unwrap());
        let mut directory = StubDirectory::new(vec![], &[("fb", 5)]);
        directory.suggestions = Err(FollowError::Config("unused".to_string()));
        let handles = discovery(directory, store, vec!["fb"])
            .candidate_handles(&session())
            .await
            .unwrap();
        assert_eq!(handles, vec!["fb".to_string()]);
    }

    #[tokio::test]
    async fn test_discovery_no_handles_is_error() {
        let store = Arc::new(SqliteAccountStore::open_in_memory().unwrap());
        let directory = StubDirectory::new(vec![], &[]);
        let result = discovery(directory, store, vec![]).run(&session()).await;
        assert!(matches!(result, Err(FollowError::Config(_))));
    }

    #[test]
    fn test_stale_refresh_keeps_failure_count() {
        let store = Arc::new(SqliteAccountStore::open_in_memory().unwrap());
        store.upsert(&CandidateAccount::new("a", 100, t0())).unwrap();

        // Discovery reads the record, then a dispatch failure lands before it writes
        let mut snapshot = store.get("a").unwrap().unwrap();
        let mut failed = snapshot.clone();
        failed.attempts = 1;
        store.upsert(&failed).unwrap();
        snapshot.follower_count = 500;
        store.upsert(&snapshot).unwrap();

        let loaded = store.get("a").unwrap().unwrap();
        assert_eq!(loaded.attempts, 1);
        assert_eq!(loaded.follower_count, 500);
    }

    #[tokio::test]
    async fn test_discovery_never_unfollows() {
        let store = Arc::new(SqliteAccountStore::open_in_memory().unwrap());
        let mut existing = CandidateAccount::new("a", 100, t0());
        existing.attempts = 2;
        existing.mark_followed(t0());
        store.upsert(&existing).unwrap();

        let directory = StubDirectory::new(vec!["a"], &[("a", 500)]);
        discovery(directory, store.clone(), vec![]).run(&session()).await.unwrap();

        let loaded = store.get("a").unwrap().unwrap();
        assert!(loaded.followed);
        assert_eq!(loaded.attempts, 2);
        assert_eq!(loaded.follower_count, 500);
    }

    fn dispatcher(store: Arc<SqliteAccountStore>) -> Dispatcher {
        Dispatcher::new(
            DispatcherConfig::default(),
            Arc::new(NoopClient),
            store,
            Arc::new(ManualClock::new(t0())),
        )
    }

    #[test]
    fn test_enqueue_from_store_filters() {
        let store = Arc::new(SqliteAccountStore::open_in_memory().unwrap());
        let mut followed = CandidateAccount::new("followed", 50_000, t0());
        followed.mark_followed(t0());
        let small = CandidateAccount::new("small", 10, t0());
        let big = CandidateAccount::new("big", 20_000, t0());
        let mut exhausted = CandidateAccount::new("exhausted", 5_000, t0());
        exhausted.attempts = 3;
        for account in [&followed, &small, &big, &exhausted] {
            store.upsert(account).unwrap();
        }

        let dispatcher = dispatcher(store.clone());
        let filter = EnqueueFilter {
            min_followers: 100,
            retry_exhausted: false,
        };
        let report = enqueue_from_store(&*store, &dispatcher, filter).unwrap();

        assert_eq!(report.loaded, 4);
        assert_eq!(report.queued, 1);
        assert_eq!(report.already_followed, 1);
        assert_eq!(report.below_min, 1);
        assert_eq!(report.exhausted, 1);
        assert_eq!(dispatcher.pending()[0].handle(), "big");

        // Tier was assigned and persisted
        assert_eq!(store.get("big").unwrap().unwrap().priority, 3);

        // Second pass finds it already queued
        let again = enqueue_from_store(&*store, &dispatcher, filter).unwrap();
        assert_eq!(again.already_queued, 1);
    }

    #[test]
    fn test_enqueue_from_store_retry_exhausted() {
        let store = Arc::new(SqliteAccountStore::open_in_memory().unwrap());
        let mut exhausted = CandidateAccount::new("tired", 5_000, t0());
        exhausted.attempts = 3;
        store.upsert(&exhausted).unwrap();

        let dispatcher = dispatcher(store.clone());
        let filter = EnqueueFilter {
            min_followers: 0,
            retry_exhausted: true,
        };
        let report = enqueue_from_store(&*store, &dispatcher, filter).unwrap();

        assert_eq!(report.queued, 1);
        assert_eq!(store.get("tired").unwrap().unwrap().attempts, 0);
        assert_eq!(dispatcher.pending()[0].attempts, 0);
    }
}
