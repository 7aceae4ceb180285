use serde::{Deserialize, Serialize};

/// Ordering key for a transient guidance event.
///
/// The source system represents this as `lastClosedSeq + 0.1`, a float used
/// purely to sort after the closing event in a consumer queue. We use a pair
/// instead: `after` is the seq of the event that triggered this guidance,
/// and `ordinal` breaks ties if a future policy ever emits more than one
/// guidance per closing event. Ordering is `(after, ordinal)` lexicographic,
/// which sorts strictly after `after` and never collides with a real `seq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GuidanceSeq {
    pub after: i64,
    pub ordinal: u16,
}

impl GuidanceSeq {
    pub fn after_event(seq: i64) -> Self {
        GuidanceSeq { after: seq, ordinal: 1 }
    }
}

impl std::fmt::Display for GuidanceSeq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.after, self.ordinal)
    }
}

/// A transient scheduler output naming the agent expected to speak next.
/// Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuidanceEvent {
    pub conversation: String,
    pub seq: GuidanceSeq,
    pub next_agent_id: String,
    pub deadline_ms: u64,
}
