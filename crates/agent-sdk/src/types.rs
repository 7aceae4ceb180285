//! Top-level SDK error type.

/// Errors surfaced by [`crate::AgentClient`]. These wrap transport and
/// protocol failures; application-level failures from the orchestrator
/// itself arrive as `orc_domain::Error` through the `OrchestratorClient`
/// trait's `Result` return type.
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("config: {0}")]
    Config(String),
    #[error("websocket: {0}")]
    WebSocket(String),
    #[error("handshake: {0}")]
    Handshake(String),
    #[error("reconnect exhausted after {0} attempts")]
    ReconnectExhausted(u32),
    #[error("request timed out")]
    Timeout,
    #[error("connection closed before a reply arrived")]
    Disconnected,
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl From<ClientError> for orc_domain::Error {
    fn from(e: ClientError) -> Self {
        orc_domain::Error::Other(e.to_string())
    }
}
