//! Wire types for the Bluesky XRPC API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An authenticated session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_jwt: String,
    pub did: String,
    pub handle: String,
}

/// Result of a follow request that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowOutcome {
    /// A follow record was created (or simulated).
    Followed,
    /// The API reports the account is already followed.
    AlreadyFollowing,
}

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub identifier: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Profile {
    #[serde(default)]
    pub followers_count: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResolvedHandle {
    pub did: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Suggestions {
    #[serde(default)]
    pub actors: Vec<SuggestedActor>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SuggestedActor {
    pub handle: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FollowRecord<'a> {
    pub subject: &'a str,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateRecord<'a> {
    pub repo: &'a str,
    pub collection: &'static str,
    pub record: FollowRecord<'a>,
}
