use serde::{Deserialize, Serialize};

/// `(conversation, agentId, clientRequestId) -> seq` record. Created on the
/// first successful message/trace insert that carries a `clientRequestId`;
/// every subsequent insert with the same key returns these coordinates
/// instead of appending.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub conversation: String,
    pub agent_id: String,
    pub client_request_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IdempotencyCoords {
    pub seq: i64,
    pub turn: i64,
    pub event: i64,
}
