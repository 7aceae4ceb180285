use serde::{Deserialize, Serialize};

/// The unique right to act on a specific guidance event.
///
/// Primary key is `(conversation, guidance_seq)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub conversation: String,
    pub guidance_seq: super::guidance::GuidanceSeq,
    pub agent_id: String,
    pub claimed_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    AlreadyMine,
    Contended,
}
