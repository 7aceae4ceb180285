//! Request/notification param and result shapes for every method the
//! orchestrator's duplex connection exposes, and the notification payloads
//! it pushes unsolicited.

use orc_domain::conversation::{Conversation, ConversationMeta};
use orc_domain::event::{AppendResult, Event, MessagePayloadInput, TracePayload};
use orc_domain::guidance::GuidanceEvent;
use serde::{Deserialize, Serialize};

pub mod name {
    pub const SUBSCRIBE: &str = "subscribe";
    pub const UNSUBSCRIBE: &str = "unsubscribe";
    pub const GET_CONVERSATION: &str = "getConversation";
    pub const GET_EVENTS_PAGE: &str = "getEventsPage";
    pub const SEND_MESSAGE: &str = "sendMessage";
    pub const SEND_TRACE: &str = "sendTrace";
    pub const CLAIM_TURN: &str = "claimTurn";
    pub const CREATE_CONVERSATION: &str = "createConversation";

    pub const EVENT: &str = "event";
    pub const GUIDANCE: &str = "guidance";
    pub const WELCOME: &str = "welcome";
    pub const PING: &str = "ping";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeParams {
    pub conversation_id: String,
    #[serde(default)]
    pub include_guidance: bool,
    #[serde(default)]
    pub since_seq: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeResult {
    pub sub_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribeParams {
    pub sub_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OkResult {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetConversationParams {
    pub conversation_id: String,
    #[serde(default)]
    pub include_scenario: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub conversation: Conversation,
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetEventsPageParams {
    pub conversation_id: String,
    #[serde(default)]
    pub after_seq: Option<i64>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventsPage {
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageParams {
    pub conversation_id: String,
    pub agent_id: String,
    pub message_payload: MessagePayloadInput,
    pub finality: orc_domain::event::Finality,
    #[serde(default)]
    pub turn: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendTraceParams {
    pub conversation_id: String,
    pub agent_id: String,
    pub trace_payload: TracePayload,
    #[serde(default)]
    pub turn: Option<i64>,
}

pub type SendResult = AppendResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimTurnParams {
    pub conversation_id: String,
    pub agent_id: String,
    pub guidance_seq: orc_domain::guidance::GuidanceSeq,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimTurnResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateConversationParams {
    #[serde(flatten)]
    pub meta: ConversationMeta,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateConversationResult {
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WelcomeParams {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PingParams {
    pub timestamp: i64,
}

/// Notification params for `guidance`; mirrors `GuidanceEvent` on the wire.
pub type GuidanceParams = GuidanceEvent;

/// Notification params for `event`; mirrors `Event` on the wire.
pub type EventParams = Event;
