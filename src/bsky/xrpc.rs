//! Bluesky XRPC client implementation
//!
//! Implements `FollowClient` and `DirectoryClient` over HTTPS with reqwest.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

use crate::bsky::client::{DirectoryClient, FollowClient};
use crate::bsky::types::{
    CreateRecord, FollowOutcome, FollowRecord, LoginRequest, Profile, ResolvedHandle, Session, Suggestions,
};
use crate::error::{FollowError, Result};

/// Default XRPC base URL
pub const DEFAULT_API_BASE: &str = "https://bsky.social/xrpc";

/// Record collection for follows
const FOLLOW_COLLECTION: &str = "app.bsky.graph.follow";

/// Default request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the XRPC client
#[derive(Debug, Clone)]
pub struct XrpcConfig {
    pub api_base: String,
    pub timeout: Duration,
}

impl Default for XrpcConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Bluesky API client
pub struct XrpcClient {
    client: Client,
    config: XrpcConfig,
}

impl XrpcClient {
    /// Create a new client
    pub fn new(config: XrpcConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    /// Full URL of an XRPC method
    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.config.api_base.trim_end_matches('/'), method)
    }

    /// Authenticate and open a session
    pub async fn login(&self, identifier: &str, password: &str) -> Result<Session> {
        log::info!("Logging in as {}", identifier);
        let request = self
            .client
            .post(self.url("com.atproto.server.createSession"))
            .json(&LoginRequest { identifier, password });

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::error!("Login failed with status {}", status);
            return Err(FollowError::Auth(format!("login failed with status {}: {}", status, body)));
        }

        let session: Session = response.json().await?;
        log::info!("Logged in as {} ({})", session.handle, session.did);
        Ok(session)
    }

    /// Send an authenticated request and decode a JSON body
    async fn get_json<T: DeserializeOwned>(&self, request: RequestBuilder, session: &Session) -> Result<T> {
        let response = request.bearer_auth(&session.access_jwt).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(FollowError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }
}

/// Map a createRecord status to a follow outcome.
///
/// 400 is the API's answer for a follow that already exists.
pub fn classify_follow_status(status: StatusCode, body: &str) -> Result<FollowOutcome> {
    match status {
        StatusCode::OK => Ok(FollowOutcome::Followed),
        StatusCode::BAD_REQUEST => Ok(FollowOutcome::AlreadyFollowing),
        other => Err(FollowError::Api {
            status: other.as_u16(),
            message: body.to_string(),
        }),
    }
}

#[async_trait]
impl FollowClient for XrpcClient {
    async fn follow_account(&self, session: &Session, identity: &str, simulate: bool) -> Result<FollowOutcome> {
        if simulate {
            log::info!("[simulate] Would follow {}", identity);
            return Ok(FollowOutcome::Followed);
        }

        log::debug!("Following {}", identity);
        let body = CreateRecord {
            repo: &session.did,
            collection: FOLLOW_COLLECTION,
            record: FollowRecord {
                subject: identity,
                created_at: Utc::now(),
            },
        };

        let response = self
            .client
            .post(self.url("com.atproto.repo.createRecord"))
            .bearer_auth(&session.access_jwt)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = if status == StatusCode::OK {
            String::new()
        } else {
            response.text().await.unwrap_or_default()
        };
        classify_follow_status(status, &text)
    }

    async fn resolve_identity(&self, session: &Session, handle: &str) -> Result<String> {
        log::debug!("Resolving handle {}", handle);
        let request = self
            .client
            .get(self.url("com.atproto.identity.resolveHandle"))
            .query(&[("handle", handle)]);
        let resolved: ResolvedHandle = self.get_json(request, session).await?;
        Ok(resolved.did)
    }
}

#[async_trait]
impl DirectoryClient for XrpcClient {
    async fn suggested_handles(&self, session: &Session, limit: u32) -> Result<Vec<String>> {
        let request = self
            .client
            .get(self.url("app.bsky.actor.getSuggestions"))
            .query(&[("limit", limit.to_string())]);
        let suggestions: Suggestions = self.get_json(request, session).await?;

        let mut handles: Vec<String> = Vec::with_capacity(suggestions.actors.len());
        for actor in suggestions.actors {
            if !handles.contains(&actor.handle) {
                handles.push(actor.handle);
            }
        }
        Ok(handles)
    }

    async fn follower_count(&self, session: &Session, actor: &str) -> Result<u64> {
        log::debug!("Fetching follower count for {}", actor);
        let request = self
            .client
            .get(self.url("app.bsky.actor.getProfile"))
            .query(&[("actor", actor)]);
        let profile: Profile = self.get_json(request, session).await?;
        Ok(profile.followers_count)
    }
}

impl std::fmt::Debug for XrpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XrpcClient")
            .field("api_base", &self.config.api_base)
            .field("timeout", &self.config.timeout)
            .finish()
    }
}
