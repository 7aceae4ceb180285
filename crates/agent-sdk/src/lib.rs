//! `orc-agent-sdk` — the remote half of the Agent Runtime.
//!
//! [`AgentClient`] is a JSON-RPC duplex client that implements
//! `orc_runtime::OrchestratorClient` over a WebSocket, so a remote agent
//! process can drive `orc_runtime::run_agent_loop` exactly the way an
//! in-process agent drives it against the orchestrator directly.
//!
//! # Connection flow
//!
//! 1. Connect WS to the orchestrator's `/rpc` endpoint.
//! 2. Wait for the `welcome` notification.
//! 3. Issue `subscribe`/`claimTurn`/`sendMessage`/... requests, correlated
//!    by numeric `id`; receive `event`/`guidance` notifications pushed
//!    unsolicited on the same socket.
//! 4. On disconnect: reconnect with jittered exponential back-off,
//!    re-subscribing from the last observed `seq` per conversation.

pub mod builder;
pub mod client;
pub mod reconnect;
pub mod types;

pub use builder::AgentClientBuilder;
pub use client::AgentClient;
pub use reconnect::ReconnectBackoff;
pub use types::ClientError;
