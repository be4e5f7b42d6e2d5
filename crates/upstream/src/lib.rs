//! Slack Web API client with rate-limit retry and a typed error set.
//!
//! Everything the rest of the proxy knows about Slack goes through the
//! [`UpstreamApi`] trait, so the service layer can be tested against mocks
//! that count calls.

pub mod client;
pub mod error;

pub use {
    client::SlackClient,
    error::{Result, UpstreamError},
};

use async_trait::async_trait;
use serde::Deserialize;

/// A channel as reported by the upstream directory.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UpstreamChannel {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_archived: bool,
}

/// Operations the proxy performs against the upstream directory API.
///
/// All calls are scoped by the caller's bot token; the client itself holds
/// no credentials.
#[async_trait]
pub trait UpstreamApi: Send + Sync {
    /// Resolve the workspace id behind a bot token (`auth.test`).
    async fn resolve_workspace(&self, token: &str) -> Result<String>;

    /// Fetch the full channel list for the token's workspace, following
    /// pagination until exhausted.
    async fn list_channels(&self, token: &str) -> Result<Vec<UpstreamChannel>>;

    /// Create a channel with the given (already normalized) name.
    async fn create_channel(&self, token: &str, name: &str) -> Result<UpstreamChannel>;
}
