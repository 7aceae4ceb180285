//! The scheduling policy: a pure function from a conversation snapshot and
//! its closing event to the next transient guidance event. No I/O, no
//! suspension — the Orchestrator treats this as an opaque callable.

use std::collections::HashMap;

use orc_domain::conversation::Participant;
use orc_domain::event::{Event, Finality};
use orc_domain::guidance::{GuidanceEvent, GuidanceSeq};

/// Everything the policy is allowed to look at: the declared participant
/// list and, for the "rotate by last-spoken" rule, each participant's most
/// recent message `seq`.
pub struct PolicySnapshot<'a> {
    pub conversation: &'a str,
    pub participants: &'a [Participant],
    pub last_spoken_seq: &'a HashMap<String, i64>,
    pub idle_turn_ms: u64,
}

pub trait SchedulingPolicy: Send + Sync {
    /// Invoked after every message append that closed a turn
    /// (`finality=turn`). Returns `None` when no guidance should be
    /// produced — always the case when `last_event.finality` is
    /// `conversation`.
    fn decide(&self, snapshot: &PolicySnapshot<'_>, last_event: &Event) -> Option<GuidanceEvent>;
}

/// Default policy: advise the single other participant; with more than two,
/// rotate to whoever spoke longest ago.
pub struct AlternationPolicy;

impl SchedulingPolicy for AlternationPolicy {
    fn decide(&self, snapshot: &PolicySnapshot<'_>, last_event: &Event) -> Option<GuidanceEvent> {
        if last_event.finality == Finality::Conversation {
            return None;
        }
        if last_event.finality != Finality::Turn {
            return None;
        }

        let candidates: Vec<&Participant> = snapshot
            .participants
            .iter()
            .filter(|p| p.agent_id != last_event.agent_id)
            .collect();

        let next = match candidates.len() {
            0 => return None,
            1 => candidates[0],
            _ => candidates
                .into_iter()
                .min_by_key(|p| {
                    snapshot
                        .last_spoken_seq
                        .get(&p.agent_id)
                        .copied()
                        .unwrap_or(i64::MIN)
                })
                .expect("non-empty candidate set"),
        };

        Some(GuidanceEvent {
            conversation: snapshot.conversation.to_string(),
            seq: GuidanceSeq::after_event(last_event.seq),
            next_agent_id: next.agent_id.clone(),
            deadline_ms: snapshot.idle_turn_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orc_domain::conversation::ParticipantKind;
    use orc_domain::event::{EventType, MessagePayload, Payload};

    fn participant(id: &str) -> Participant {
        Participant {
            agent_id: id.to_string(),
            kind: ParticipantKind::External,
            agent_class: None,
            config: None,
        }
    }

    fn closing_message(agent: &str, seq: i64, finality: Finality) -> Event {
        Event {
            seq,
            conversation: "c1".to_string(),
            turn: 1,
            event: 1,
            event_type: EventType::Message,
            finality,
            agent_id: agent.to_string(),
            payload: Payload::Message(MessagePayload::default()),
            ts: chrono::Utc::now(),
        }
    }

    #[test]
    fn two_agent_alternation_picks_the_other() {
        let participants = vec![participant("A"), participant("B")];
        let last_spoken = HashMap::new();
        let snapshot = PolicySnapshot {
            conversation: "c1",
            participants: &participants,
            last_spoken_seq: &last_spoken,
            idle_turn_ms: 30_000,
        };
        let guidance = AlternationPolicy
            .decide(&snapshot, &closing_message("A", 1, Finality::Turn))
            .unwrap();
        assert_eq!(guidance.next_agent_id, "B");
        assert_eq!(guidance.seq, GuidanceSeq::after_event(1));
    }

    #[test]
    fn conversation_finality_produces_no_guidance() {
        let participants = vec![participant("A"), participant("B")];
        let last_spoken = HashMap::new();
        let snapshot = PolicySnapshot {
            conversation: "c1",
            participants: &participants,
            last_spoken_seq: &last_spoken,
            idle_turn_ms: 30_000,
        };
        assert!(AlternationPolicy
            .decide(&snapshot, &closing_message("A", 1, Finality::Conversation))
            .is_none());
    }

    #[test]
    fn more_than_two_participants_rotate_by_oldest_spoken() {
        let participants = vec![participant("A"), participant("B"), participant("C")];
        let mut last_spoken = HashMap::new();
        last_spoken.insert("B".to_string(), 5);
        last_spoken.insert("C".to_string(), 2);
        let snapshot = PolicySnapshot {
            conversation: "c1",
            participants: &participants,
            last_spoken_seq: &last_spoken,
            idle_turn_ms: 30_000,
        };
        let guidance = AlternationPolicy
            .decide(&snapshot, &closing_message("A", 9, Finality::Turn))
            .unwrap();
        assert_eq!(guidance.next_agent_id, "C");
    }
}
