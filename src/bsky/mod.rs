//! Bluesky API layer
//!
//! - `FollowClient` / `DirectoryClient`: traits the engine and discovery depend on
//! - `XrpcClient`: reqwest implementation against the public XRPC endpoints

pub mod client;
pub mod types;
pub mod xrpc;

pub use client::{DirectoryClient, FollowClient};
pub use types::{FollowOutcome, Session};
pub use xrpc::{DEFAULT_API_BASE, XrpcClient, XrpcConfig, classify_follow_status};
