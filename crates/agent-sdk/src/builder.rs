//! Builder pattern for constructing an [`AgentClient`].

use std::time::Duration;

use crate::client::AgentClient;
use crate::reconnect::ReconnectBackoff;
use crate::types::ClientError;

/// Fluent builder for [`AgentClient`].
///
/// ```rust,no_run
/// # use orc_agent_sdk::AgentClientBuilder;
/// let client = AgentClientBuilder::new()
///     .url("ws://localhost:8787/rpc")
///     .ping_interval(std::time::Duration::from_secs(30))
///     .build()
///     .unwrap();
/// ```
pub struct AgentClientBuilder {
    pub(crate) url: String,
    pub(crate) ping_interval: Duration,
    pub(crate) reconnect_backoff: ReconnectBackoff,
}

impl AgentClientBuilder {
    pub fn new() -> Self {
        Self {
            url: "ws://localhost:8787/rpc".into(),
            ping_interval: Duration::from_secs(30),
            reconnect_backoff: ReconnectBackoff::default(),
        }
    }

    /// Set the orchestrator's RPC WebSocket URL.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Override the keep-alive ping interval (default 30s).
    pub fn ping_interval(mut self, d: Duration) -> Self {
        self.ping_interval = d;
        self
    }

    /// Override the reconnect backoff policy.
    pub fn reconnect_backoff(mut self, cfg: ReconnectBackoff) -> Self {
        self.reconnect_backoff = cfg;
        self
    }

    /// Build the client and start its connection-management task.
    pub fn build(self) -> Result<std::sync::Arc<AgentClient>, ClientError> {
        if self.url.is_empty() {
            return Err(ClientError::Config("url is required".into()));
        }
        Ok(AgentClient::connect(self.url, self.reconnect_backoff, self.ping_interval))
    }
}

impl Default for AgentClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
