use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantKind {
    Internal,
    External,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub agent_id: String,
    pub kind: ParticipantKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConversationMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "scenarioRef")]
    pub scenario_ref: Option<String>,
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "startingAgentId")]
    pub starting_agent_id: Option<String>,
    #[serde(default)]
    pub extra: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(flatten)]
    pub meta: ConversationMeta,
    pub status: ConversationStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Patch applied by `updateMeta`; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversationMetaPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub participants: Option<Vec<Participant>>,
    pub starting_agent_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ConversationFilter {
    pub status: Option<ConversationStatus>,
    pub scenario_ref: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}
