//! Collaborator traits for the social-graph API
//!
//! The dispatcher only needs `FollowClient`; discovery needs `DirectoryClient`.
//! Both are implemented by `XrpcClient` and by test doubles.

use async_trait::async_trait;

use crate::bsky::types::{FollowOutcome, Session};
use crate::error::Result;

/// The narrow interface the dispatcher uses to act on the remote graph.
#[async_trait]
pub trait FollowClient: Send + Sync {
    /// Follow `identity`. With `simulate` set, report success without any request.
    async fn follow_account(&self, session: &Session, identity: &str, simulate: bool) -> Result<FollowOutcome>;

    /// Resolve a handle to its decentralized identifier.
    async fn resolve_identity(&self, session: &Session, handle: &str) -> Result<String>;
}

/// Read-only lookups used by discovery.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Suggested account handles, deduplicated, in API order.
    async fn suggested_handles(&self, session: &Session, limit: u32) -> Result<Vec<String>>;

    /// Follower count of an actor (handle or identity).
    async fn follower_count(&self, session: &Session, actor: &str) -> Result<u64>;
}
