use serde::{Deserialize, Serialize};

/// The three event kinds a conversation log can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Message,
    Trace,
    System,
}

/// Whether a message closes a turn, closes the conversation, or neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Finality {
    None,
    Turn,
    Conversation,
}

impl Finality {
    pub fn is_terminal_for_turn(self) -> bool {
        matches!(self, Finality::Turn | Finality::Conversation)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub id: String,
    pub name: String,
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_ref: Option<String>,
}

/// An attachment as given by a caller before it is persisted and rewritten
/// into an `AttachmentRef`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub content_type: String,
    /// Raw bytes, base64-encoded on the wire. Never stored in the event
    /// payload past commit — only in the attachment row.
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageOutcome {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MessagePayload {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<MessageOutcome>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "clientRequestId")]
    pub client_request_id: Option<String>,
}

/// Input shape for a message append, before attachments are rewritten to
/// references.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MessagePayloadInput {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentInput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<MessageOutcome>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "clientRequestId")]
    pub client_request_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    Thought,
    ToolCall,
    ToolResult,
    UserQuery,
    UserResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracePayload {
    pub kind: TraceKind,
    #[serde(flatten)]
    pub detail: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none", rename = "clientRequestId")]
    pub client_request_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemKind {
    TurnClaimed,
    ClaimExpired,
    MetaCreated,
    MetaUpdated,
    Note,
    IdleTimeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemPayload {
    pub kind: SystemKind,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub detail: serde_json::Value,
}

/// Tagged union over the three payload shapes. Storage treats this as an
/// opaque JSON blob; only the fields invariants care about are inspected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Message(MessagePayload),
    Trace(TracePayload),
    System(SystemPayload),
}

impl Payload {
    pub fn event_type(&self) -> EventType {
        match self {
            Payload::Message(_) => EventType::Message,
            Payload::Trace(_) => EventType::Trace,
            Payload::System(_) => EventType::System,
        }
    }

    pub fn client_request_id(&self) -> Option<&str> {
        match self {
            Payload::Message(m) => m.client_request_id.as_deref(),
            Payload::Trace(t) => t.client_request_id.as_deref(),
            Payload::System(_) => None,
        }
    }
}

/// Caller-facing counterpart of [`Payload`]: the message variant still
/// carries raw attachment bytes. The event store peels these off into
/// `Attachment` rows and rewrites the stored/wire payload down to
/// `Payload`, which only ever holds references.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PayloadInput {
    Message(MessagePayloadInput),
    Trace(TracePayload),
    System(SystemPayload),
}

impl PayloadInput {
    pub fn event_type(&self) -> EventType {
        match self {
            PayloadInput::Message(_) => EventType::Message,
            PayloadInput::Trace(_) => EventType::Trace,
            PayloadInput::System(_) => EventType::System,
        }
    }

    pub fn client_request_id(&self) -> Option<&str> {
        match self {
            PayloadInput::Message(m) => m.client_request_id.as_deref(),
            PayloadInput::Trace(t) => t.client_request_id.as_deref(),
            PayloadInput::System(_) => None,
        }
    }
}

/// A persisted event: the unit of the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub seq: i64,
    pub conversation: String,
    pub turn: i64,
    pub event: i64,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub finality: Finality,
    pub agent_id: String,
    pub payload: Payload,
    pub ts: chrono::DateTime<chrono::Utc>,
}

/// Caller-supplied shape for `appendEvent`, before turn/event/seq/attachment
/// allocation.
#[derive(Debug, Clone)]
pub struct AppendInput {
    pub conversation: String,
    pub finality: Finality,
    pub agent_id: String,
    pub payload: PayloadInput,
    pub turn: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendResult {
    pub seq: i64,
    pub turn: i64,
    pub event: i64,
}

/// Persisted attachment row, owned by the event that introduced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub conversation: String,
    pub turn: i64,
    pub event: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_ref: Option<String>,
    pub name: String,
    pub content_type: String,
    pub content: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub created_by_agent: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Summary of a conversation's append state, used to decide turn allocation.
#[derive(Debug, Clone, Copy)]
pub struct Head {
    pub last_turn: i64,
    pub last_closed_seq: i64,
    pub has_open_turn: bool,
}

impl Default for Head {
    fn default() -> Self {
        Head {
            last_turn: 0,
            last_closed_seq: 0,
            has_open_turn: false,
        }
    }
}
