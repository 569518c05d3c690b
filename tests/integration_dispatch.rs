//! Dispatch engine integration tests
//!
//! Drives the public API end to end: a real SQLite store in a temp dir, a
//! manual clock, and either a scripted follow client or the XRPC client in
//! simulate mode.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use skyfollow::bsky::{FollowClient, FollowOutcome, Session, XrpcClient, XrpcConfig};
use skyfollow::clock::{Clock, ManualClock};
use skyfollow::domain::{CandidateAccount, DispatchItem};
use skyfollow::error::{FollowError, Result};
use skyfollow::producer::{EnqueueFilter, enqueue_from_store};
use skyfollow::queue::PriorityQueue;
use skyfollow::scheduler::{
    Dispatcher, DispatcherConfig, RateLimitConfig, RetryPolicy, TickOutcome, WaitReason,
};
use skyfollow::store::{AccountStore, SqliteAccountStore, import_json};
use tempfile::TempDir;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
}

fn session() -> Session {
    Session {
        access_jwt: "jwt".to_string(),
        did: "did:plc:operator".to_string(),
        handle: "operator.test".to_string(),
    }
}

/// Follow client with per-identity scripted failures.
#[derive(Default)]
struct ScriptedClient {
    calls: Mutex<Vec<(String, bool)>>,
    failures: Mutex<HashMap<String, u32>>,
}

impl ScriptedClient {
    fn fail_times(&self, identity: &str, times: u32) {
        self.failures.lock().unwrap().insert(identity.to_string(), times);
    }

    fn calls(&self) -> Vec<(String, bool)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FollowClient for ScriptedClient {
    async fn follow_account(&self, _session: &Session, identity: &str, simulate: bool) -> Result<FollowOutcome> {
        self.calls.lock().unwrap().push((identity.to_string(), simulate));
        let mut failures = self.failures.lock().unwrap();
        if let Some(left) = failures.get_mut(identity)
            && *left > 0
        {
            *left -= 1;
            return Err(FollowError::Api {
                status: 502,
                message: "bad gateway".to_string(),
            });
        }
        Ok(FollowOutcome::Followed)
    }

    async fn resolve_identity(&self, _session: &Session, handle: &str) -> Result<String> {
        Ok(format!("did:plc:{}", handle.split('.').next().unwrap_or(handle)))
    }
}

struct Engine {
    dispatcher: Dispatcher,
    client: Arc<ScriptedClient>,
    store: Arc<SqliteAccountStore>,
    clock: Arc<ManualClock>,
    _temp: TempDir,
}

fn engine(rate: RateLimitConfig) -> Engine {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(SqliteAccountStore::open(temp.path().join("accounts.db")).unwrap());
    let client = Arc::new(ScriptedClient::default());
    let clock = Arc::new(ManualClock::new(t0()));
    let config = DispatcherConfig {
        rate,
        retry: RetryPolicy::new(3, Duration::minutes(5)),
        poll_interval: StdDuration::from_millis(5),
        idle_poll: StdDuration::from_millis(5),
        simulate: false,
    };
    let dispatcher = Dispatcher::new(config, client.clone(), store.clone(), clock.clone());
    Engine {
        dispatcher,
        client,
        store,
        clock,
        _temp: temp,
    }
}

fn no_cooldown(max_per_window: u32) -> RateLimitConfig {
    RateLimitConfig::new(max_per_window, Duration::hours(1), Duration::zero())
}

fn seed(store: &dyn AccountStore, handle: &str, followers: u64) {
    store
        .upsert(&CandidateAccount::new(handle, followers, t0()).with_identity(format!("did:plc:{}", handle)))
        .unwrap();
}

#[test]
fn test_queue_scenario_priority_then_eligibility() {
    let now = t0();
    let mut queue = PriorityQueue::new();

    let mut a = CandidateAccount::new("a", 20_000, now);
    a.assign_priority();
    let mut b = CandidateAccount::new("b", 50, now);
    b.assign_priority();
    queue.push(DispatchItem::new(b, now)).unwrap();
    queue.push(DispatchItem::new(a, now)).unwrap();

    assert_eq!(queue.pop().unwrap().handle(), "a");
    assert_eq!(queue.pop().unwrap().handle(), "b");
    assert!(queue.pop().is_none());

    let mut later = CandidateAccount::new("later", 10, now);
    later.assign_priority();
    let mut sooner = CandidateAccount::new("sooner", 10, now);
    sooner.assign_priority();
    queue
        .push(DispatchItem::new(later, now).eligible_at(now + Duration::minutes(2)))
        .unwrap();
    queue
        .push(DispatchItem::new(sooner, now).eligible_at(now + Duration::minutes(1)))
        .unwrap();
    assert_eq!(queue.pop().unwrap().handle(), "sooner");
}

#[tokio::test]
async fn test_store_to_dispatch_end_to_end() {
    let e = engine(no_cooldown(50));
    seed(&*e.store, "big", 25_000);
    seed(&*e.store, "mid", 5_000);
    seed(&*e.store, "small", 20);

    let report = enqueue_from_store(&*e.store, &e.dispatcher, EnqueueFilter::default()).unwrap();
    assert_eq!(report.queued, 3);

    for _ in 0..3 {
        assert!(matches!(e.dispatcher.tick(&session()).await, TickOutcome::Committed { .. }));
    }
    assert_eq!(e.dispatcher.tick(&session()).await, TickOutcome::Idle);

    let order: Vec<String> = e.client.calls().into_iter().map(|(id, _)| id).collect();
    assert_eq!(order, vec!["did:plc:big", "did:plc:mid", "did:plc:small"]);

    let counts = e.store.counts(3).unwrap();
    assert_eq!(counts.followed, 3);
    assert_eq!(counts.pending, 0);
}

#[tokio::test]
async fn test_followed_accounts_never_dispatched_again() {
    let e = engine(no_cooldown(50));
    seed(&*e.store, "once", 100);
    enqueue_from_store(&*e.store, &e.dispatcher, EnqueueFilter::default()).unwrap();
    e.dispatcher.tick(&session()).await;

    // A producer refresh that still believes the account is unfollowed
    let stale = CandidateAccount::new("once", 150, t0());
    e.store.upsert(&stale).unwrap();
    assert!(e.store.get("once").unwrap().unwrap().followed);

    let report = enqueue_from_store(&*e.store, &e.dispatcher, EnqueueFilter::default()).unwrap();
    assert_eq!(report.queued, 0);
    assert_eq!(report.already_followed, 1);
    assert_eq!(e.client.calls().len(), 1);
}

#[tokio::test]
async fn test_persisted_flag_checked_before_follow() {
    let e = engine(no_cooldown(50));
    // Queued while unfollowed, then marked followed by another process
    e.dispatcher.enqueue(CandidateAccount::new("racer", 10, t0()));
    let mut followed = CandidateAccount::new("racer", 10, t0());
    followed.mark_followed(t0());
    e.store.upsert(&followed).unwrap();

    let outcome = e.dispatcher.tick(&session()).await;
    assert_eq!(
        outcome,
        TickOutcome::Skipped {
            handle: "racer".to_string()
        }
    );
    assert!(e.client.calls().is_empty());
}

#[tokio::test]
async fn test_backoff_and_drop_persisted() {
    let e = engine(no_cooldown(50));
    seed(&*e.store, "flaky", 100);
    e.client.fail_times("did:plc:flaky", 10);
    enqueue_from_store(&*e.store, &e.dispatcher, EnqueueFilter::default()).unwrap();

    let first = e.dispatcher.tick(&session()).await;
    assert!(matches!(first, TickOutcome::Rescheduled { attempts: 1, next_eligible, .. } if next_eligible == t0() + Duration::minutes(5)));
    assert_eq!(e.store.get("flaky").unwrap().unwrap().attempts, 1);

    e.clock.advance(Duration::minutes(5));
    let second_at = e.clock.now();
    let second = e.dispatcher.tick(&session()).await;
    assert!(matches!(second, TickOutcome::Rescheduled { attempts: 2, next_eligible, .. } if next_eligible == second_at + Duration::minutes(10)));

    e.clock.advance(Duration::minutes(10));
    let third = e.dispatcher.tick(&session()).await;
    assert!(matches!(third, TickOutcome::Dropped { attempts: 3, .. }));
    assert!(e.dispatcher.pending().is_empty());

    let stored = e.store.get("flaky").unwrap().unwrap();
    assert!(!stored.followed);
    assert_eq!(stored.attempts, 3);
    assert_eq!(e.store.counts(3).unwrap().exhausted, 1);

    // Exhausted accounts stay out until explicitly retried
    let report = enqueue_from_store(&*e.store, &e.dispatcher, EnqueueFilter::default()).unwrap();
    assert_eq!(report.exhausted, 1);
    let retry = EnqueueFilter {
        min_followers: 0,
        retry_exhausted: true,
    };
    let report = enqueue_from_store(&*e.store, &e.dispatcher, retry).unwrap();
    assert_eq!(report.queued, 1);
}

#[tokio::test]
async fn test_rate_ceiling_of_two() {
    let e = engine(no_cooldown(2));
    for handle in ["one", "two", "three"] {
        seed(&*e.store, handle, 10);
    }
    enqueue_from_store(&*e.store, &e.dispatcher, EnqueueFilter::default()).unwrap();

    assert!(matches!(e.dispatcher.tick(&session()).await, TickOutcome::Committed { .. }));
    e.clock.advance(Duration::minutes(1));
    assert!(matches!(e.dispatcher.tick(&session()).await, TickOutcome::Committed { .. }));

    e.clock.advance(Duration::minutes(30));
    assert!(matches!(
        e.dispatcher.tick(&session()).await,
        TickOutcome::Waiting {
            reason: WaitReason::WindowFull,
            ..
        }
    ));
    assert_eq!(e.dispatcher.pending()[0].attempts, 0);

    e.clock.set(t0() + Duration::hours(1));
    assert!(matches!(e.dispatcher.tick(&session()).await, TickOutcome::Committed { .. }));
    assert_eq!(e.dispatcher.status().governor.window_count, 1);
}

#[tokio::test]
async fn test_cooldown_independent_of_window() {
    let e = engine(RateLimitConfig::new(50, Duration::hours(1), Duration::hours(24)));
    seed(&*e.store, "first", 10);
    seed(&*e.store, "second", 10);
    enqueue_from_store(&*e.store, &e.dispatcher, EnqueueFilter::default()).unwrap();

    assert!(matches!(e.dispatcher.tick(&session()).await, TickOutcome::Committed { .. }));

    // Several windows later the count is long reset, but the cooldown holds
    e.clock.advance(Duration::hours(5));
    assert_eq!(
        e.dispatcher.tick(&session()).await,
        TickOutcome::Waiting {
            reason: WaitReason::Cooldown,
            until: t0() + Duration::hours(24)
        }
    );

    e.clock.advance(Duration::hours(19));
    assert!(matches!(e.dispatcher.tick(&session()).await, TickOutcome::Committed { .. }));
}

#[tokio::test]
async fn test_simulate_matches_real_commit_path() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(SqliteAccountStore::open(temp.path().join("accounts.db")).unwrap());
    // Unroutable base: simulate must not touch the network
    let client = Arc::new(
        XrpcClient::new(XrpcConfig {
            api_base: "http://127.0.0.1:1/xrpc".to_string(),
            timeout: StdDuration::from_millis(100),
        })
        .unwrap(),
    );
    let clock = Arc::new(ManualClock::new(t0()));
    let config = DispatcherConfig {
        rate: no_cooldown(50),
        simulate: true,
        ..Default::default()
    };
    let dispatcher = Dispatcher::new(config, client, store.clone(), clock);

    seed(&*store, "sim", 12_000);
    enqueue_from_store(&*store, &dispatcher, EnqueueFilter::default()).unwrap();

    let outcome = dispatcher.tick(&session()).await;
    assert_eq!(
        outcome,
        TickOutcome::Committed {
            handle: "sim".to_string(),
            outcome: FollowOutcome::Followed
        }
    );

    let status = dispatcher.status();
    assert!(status.simulate);
    assert_eq!(status.governor.window_count, 1);
    assert_eq!(status.governor.last_follow_at, Some(t0()));

    let stored = store.get("sim").unwrap().unwrap();
    assert!(stored.followed);
    assert_eq!(stored.follow_date, Some(t0()));
}

#[tokio::test]
async fn test_dry_run_on_copy_leaves_durable_store_untouched() {
    let temp = TempDir::new().unwrap();
    let durable = Arc::new(SqliteAccountStore::open(temp.path().join("accounts.db")).unwrap());
    seed(&*durable, "one", 12_000);
    seed(&*durable, "two", 800);

    let copy = Arc::new(durable.copy_to_memory().unwrap());
    let client = Arc::new(
        XrpcClient::new(XrpcConfig {
            api_base: "http://127.0.0.1:1/xrpc".to_string(),
            timeout: StdDuration::from_millis(100),
        })
        .unwrap(),
    );
    let config = DispatcherConfig {
        rate: no_cooldown(50),
        simulate: true,
        ..Default::default()
    };
    let dry = Dispatcher::new(config, client, copy.clone(), Arc::new(ManualClock::new(t0())));
    let report = enqueue_from_store(&*copy, &dry, EnqueueFilter::default()).unwrap();
    assert_eq!(report.queued, 2);

    dry.tick(&session()).await;
    dry.tick(&session()).await;
    assert_eq!(dry.status().counters.followed, 2);
    assert_eq!(copy.counts(3).unwrap().followed, 2);

    let counts = durable.counts(3).unwrap();
    assert_eq!(counts.followed, 0);
    assert_eq!(counts.pending, 2);
    assert!(durable.get("one").unwrap().unwrap().follow_date.is_none());

    // A later real run still has both accounts to follow
    let e = engine(no_cooldown(50));
    let real = enqueue_from_store(&*durable, &e.dispatcher, EnqueueFilter::default()).unwrap();
    assert_eq!(real.queued, 2);
}

#[tokio::test]
async fn test_followed_identity_not_refollowed_under_new_handle() {
    let e = engine(no_cooldown(50));
    let mut old = CandidateAccount::new("old.handle", 5_000, t0()).with_identity("did:plc:x");
    old.mark_followed(t0());
    e.store.upsert(&old).unwrap();
    e.store
        .upsert(&CandidateAccount::new("new.handle", 5_000, t0()).with_identity("did:plc:x"))
        .unwrap();

    let report = enqueue_from_store(&*e.store, &e.dispatcher, EnqueueFilter::default()).unwrap();
    assert_eq!(report.queued, 1);
    assert_eq!(
        e.dispatcher.tick(&session()).await,
        TickOutcome::Skipped {
            handle: "new.handle".to_string()
        }
    );
    assert!(e.client.calls().is_empty());
}

#[tokio::test]
async fn test_import_then_run_until_shutdown() {
    let e = engine(no_cooldown(50));
    let export = e._temp.path().join("users.json");
    std::fs::write(
        &export,
        r#"[
            {"handle":"alpha.bsky.social","did":"did:plc:alpha","followers":15000,"savedOn":"2024-12-01T00:00:00Z"},
            {"handle":"beta.bsky.social","did":"","followers":700,"savedOn":"2024-12-01T00:00:00Z"}
        ]"#,
    )
    .unwrap();
    let report = import_json(&*e.store, &export, t0()).unwrap();
    assert_eq!(report.created, 2);

    enqueue_from_store(&*e.store, &e.dispatcher, EnqueueFilter::default()).unwrap();

    let (tx, rx) = tokio::sync::watch::channel(false);
    let engine = Arc::new(e);
    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move {
            let session = session();
            engine.dispatcher.run(&session, rx).await
        })
    };

    for _ in 0..200 {
        if engine.dispatcher.status().counters.followed == 2 {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(5)).await;
    }
    tx.send(true).unwrap();
    let status = runner.await.unwrap();

    assert_eq!(status.counters.followed, 2);
    assert_eq!(status.queued, 0);
    // Missing identity was resolved before following
    let beta = engine.store.get("beta.bsky.social").unwrap().unwrap();
    assert!(beta.followed);
    assert_eq!(beta.identity, "did:plc:beta");
}

#[tokio::test]
async fn test_restart_does_not_refollow() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("accounts.db");
    let client = Arc::new(ScriptedClient::default());

    {
        let store = Arc::new(SqliteAccountStore::open(&path).unwrap());
        seed(&*store, "kept", 10);
        let config = DispatcherConfig {
            rate: no_cooldown(50),
            simulate: false,
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(config, client.clone(), store.clone(), Arc::new(ManualClock::new(t0())));
        enqueue_from_store(&*store, &dispatcher, EnqueueFilter::default()).unwrap();
        dispatcher.tick(&session()).await;
    }

    let store = Arc::new(SqliteAccountStore::open(&path).unwrap());
    let dispatcher = Dispatcher::new(
        DispatcherConfig::default(),
        client.clone(),
        store.clone(),
        Arc::new(ManualClock::new(t0() + Duration::days(2))),
    );
    let report = enqueue_from_store(&*store, &dispatcher, EnqueueFilter::default()).unwrap();
    assert_eq!(report.queued, 0);
    assert_eq!(dispatcher.tick(&session()).await, TickOutcome::Idle);
    assert_eq!(client.calls().len(), 1);
}
