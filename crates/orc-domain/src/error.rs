/// Shared error type used across all orchestrator crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("conversation {0} is closed")]
    ConversationClosed(String),

    #[error("turn {turn} in conversation {conversation} is closed")]
    TurnClosed { conversation: String, turn: i64 },

    #[error("conversation {0} has no open turn")]
    NoOpenTurn(String),

    #[error("finality {finality:?} is not valid for event type {event_type}")]
    InvalidFinalityForType {
        event_type: String,
        finality: String,
    },

    #[error("claim contended: guidance {guidance_seq} in {conversation} already claimed")]
    ClaimContended {
        conversation: String,
        guidance_seq: String,
    },

    #[error("subscriber overrun on conversation {0}")]
    SubscriberOverrun(String),

    #[error("transport disconnected: {0}")]
    TransportDisconnect(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable string discriminant used by the RPC layer to pick an error code.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::ConversationNotFound(_) => "conversation_not_found",
            Error::ConversationClosed(_) => "conversation_closed",
            Error::TurnClosed { .. } => "turn_closed",
            Error::NoOpenTurn(_) => "no_open_turn",
            Error::InvalidFinalityForType { .. } => "invalid_finality_for_type",
            Error::ClaimContended { .. } => "claim_contended",
            Error::SubscriberOverrun(_) => "subscriber_overrun",
            Error::TransportDisconnect(_) => "transport_disconnect",
            Error::Config(_) => "config",
            Error::Other(_) => "other",
        }
    }
}
