use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use orc_domain::event::{
    AppendInput, AppendResult, Attachment, AttachmentRef, Event, EventType, Finality, Head,
    MessagePayload, Payload, PayloadInput,
};
use orc_domain::idempotency::IdempotencyCoords;
use orc_domain::{Error, Result};
use parking_lot::Mutex;
use tokio::sync::RwLock as AsyncRwLock;

use crate::conversation_store::ConversationStore;

/// What happened when an append was processed. `Dropped` covers invariant 7
/// (a system event with no open turn is advisory-only and silently
/// discarded, not an error).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended(AppendResult),
    Dropped,
}

/// In-memory log for one conversation plus its JSONL durability file.
///
/// Bounded like the teacher's run store: old events stay on disk, only a
/// recent window is kept resident. `base_seq_idx` is the physical index of
/// the oldest event still in `events`, mirroring the `base_seq` offset
/// trick used to keep id-indexed lookups O(1) as the window slides.
struct ConversationLog {
    events: VecDeque<Event>,
    base_seq_idx: usize,
    head: Head,
    closed: bool,
    idempotency: HashMap<(String, String), IdempotencyCoords>,
    attachments: HashMap<String, Attachment>,
    log_path: Option<PathBuf>,
}

const MAX_EVENTS_IN_MEMORY: usize = 10_000;

impl ConversationLog {
    fn new(log_path: Option<PathBuf>) -> Self {
        let mut log = ConversationLog {
            events: VecDeque::new(),
            base_seq_idx: 0,
            head: Head::default(),
            closed: false,
            idempotency: HashMap::new(),
            attachments: HashMap::new(),
            log_path,
        };
        log.load();
        log
    }

    fn load(&mut self) {
        let Some(path) = &self.log_path else {
            return;
        };
        let Ok(contents) = std::fs::read_to_string(path) else {
            return;
        };
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(event) = serde_json::from_str::<Event>(line) {
                self.apply_replayed(event);
            }
        }
    }

    fn apply_replayed(&mut self, event: Event) {
        self.recompute_head_for(&event);
        if let Payload::Message(m) = &event.payload {
            if let Some(crid) = &m.client_request_id {
                self.idempotency.insert(
                    (event.agent_id.clone(), crid.clone()),
                    IdempotencyCoords {
                        seq: event.seq,
                        turn: event.turn,
                        event: event.event,
                    },
                );
            }
        }
        self.events.push_back(event);
        if self.events.len() > MAX_EVENTS_IN_MEMORY {
            self.events.pop_front();
            self.base_seq_idx += 1;
        }
    }

    fn recompute_head_for(&mut self, event: &Event) {
        self.head.last_turn = self.head.last_turn.max(event.turn);
        match event.event_type {
            EventType::Message => {
                self.head.has_open_turn = !event.finality.is_terminal_for_turn();
                if event.finality.is_terminal_for_turn() {
                    self.head.last_closed_seq = event.seq;
                }
                if event.finality == Finality::Conversation {
                    self.closed = true;
                }
            }
            EventType::Trace | EventType::System => {}
        }
    }

    fn persist(&self, event: &Event) {
        let Some(path) = &self.log_path else {
            return;
        };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(mut f) = std::fs::OpenOptions::new().create(true).append(true).open(path) {
            if let Ok(line) = serde_json::to_string(event) {
                let _ = writeln!(f, "{line}");
            }
        }
    }

    fn next_event_index(&self, turn: i64) -> i64 {
        self.events
            .iter()
            .filter(|e| e.turn == turn)
            .map(|e| e.event)
            .max()
            .unwrap_or(0)
            + 1
    }
}

/// Durable append-only log. Allocates turn/event indices, validates
/// invariants 1-8, persists events and attachments, exposes reads.
///
/// Every `append_event` runs under the target conversation's own lock, so
/// invariants hold without a global lock; the global `seq` counter is the
/// only state shared across conversations and is a single atomic.
pub struct EventStore {
    global_seq: AtomicI64,
    state_dir: Option<PathBuf>,
    conversations: AsyncRwLock<HashMap<String, Arc<Mutex<ConversationLog>>>>,
}

impl EventStore {
    pub fn new(state_dir: Option<PathBuf>) -> Self {
        EventStore {
            global_seq: AtomicI64::new(0),
            state_dir,
            conversations: AsyncRwLock::new(HashMap::new()),
        }
    }

    async fn log_for(&self, conversation: &str) -> Arc<Mutex<ConversationLog>> {
        if let Some(log) = self.conversations.read().await.get(conversation) {
            return log.clone();
        }
        let mut guard = self.conversations.write().await;
        guard
            .entry(conversation.to_string())
            .or_insert_with(|| {
                let path = self
                    .state_dir
                    .as_ref()
                    .map(|d| d.join("conversations").join(conversation).join("events.jsonl"));
                let log = ConversationLog::new(path);
                let max_seq = log.events.iter().map(|e| e.seq).max().unwrap_or(0);
                self.global_seq.fetch_max(max_seq, Ordering::SeqCst);
                Arc::new(Mutex::new(log))
            })
            .clone()
    }

    pub async fn append_event(
        &self,
        conversations: &ConversationStore,
        input: AppendInput,
    ) -> Result<AppendOutcome> {
        if conversations.get(&input.conversation).is_none() {
            return Err(Error::ConversationNotFound(input.conversation.clone()));
        }

        let log = self.log_for(&input.conversation).await;
        let mut log = log.lock();

        if log.closed {
            return Err(Error::ConversationClosed(input.conversation.clone()));
        }

        if let Some(crid) = input.payload.client_request_id() {
            if let Some(coords) = log.idempotency.get(&(input.agent_id.clone(), crid.to_string())) {
                tracing::debug!(
                    conversation = %input.conversation,
                    client_request_id = crid,
                    "idempotent replay"
                );
                return Ok(AppendOutcome::Appended(AppendResult {
                    seq: coords.seq,
                    turn: coords.turn,
                    event: coords.event,
                }));
            }
        }

        let event_type = input.payload.event_type();

        let turn = match resolve_turn(&log.head, event_type, input.turn) {
            Some(t) => t,
            None => {
                if event_type == EventType::System {
                    tracing::debug!(
                        conversation = %input.conversation,
                        "system event dropped: no open turn"
                    );
                    return Ok(AppendOutcome::Dropped);
                }
                return Err(no_open_turn_error(event_type, &input.conversation, &log.head));
            }
        };

        if matches!(input.finality, Finality::Turn | Finality::Conversation)
            && event_type != EventType::Message
        {
            return Err(Error::InvalidFinalityForType {
                event_type: format!("{event_type:?}"),
                finality: format!("{:?}", input.finality),
            });
        }

        let turn_is_open = turn == log.head.last_turn && log.head.has_open_turn;
        let is_new_turn = turn == log.head.last_turn + 1;
        if !turn_is_open && !(is_new_turn && event_type == EventType::Message) {
            return Err(Error::TurnClosed {
                conversation: input.conversation.clone(),
                turn,
            });
        }

        let event_index = log.next_event_index(turn);
        let seq = self.global_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let payload = stage_attachments(
            &mut log,
            input.payload,
            &input.conversation,
            turn,
            event_index,
            &input.agent_id,
        );

        let event = Event {
            seq,
            conversation: input.conversation.clone(),
            turn,
            event: event_index,
            event_type,
            finality: input.finality,
            agent_id: input.agent_id.clone(),
            payload,
            ts: chrono::Utc::now(),
        };

        log.recompute_head_for(&event);
        log.persist(&event);

        if let Some(crid) = event.payload.client_request_id() {
            log.idempotency.insert(
                (input.agent_id.clone(), crid.to_string()),
                IdempotencyCoords { seq, turn, event: event_index },
            );
        }

        log.events.push_back(event.clone());
        if log.events.len() > MAX_EVENTS_IN_MEMORY {
            log.events.pop_front();
            log.base_seq_idx += 1;
        }

        let closed_conversation = log.closed;
        drop(log);

        if closed_conversation {
            conversations.complete(&input.conversation)?;
        } else {
            conversations.touch(&input.conversation);
        }

        tracing::info!(
            conversation = %event.conversation,
            turn = event.turn,
            event = event.event,
            seq = event.seq,
            "event appended"
        );

        Ok(AppendOutcome::Appended(AppendResult { seq, turn, event: event_index }))
    }

    pub async fn get_head(&self, conversation: &str) -> Option<Head> {
        let guard = self.conversations.read().await;
        guard.get(conversation).map(|l| l.lock().head)
    }

    pub async fn get_events(
        &self,
        conversation: &str,
        after_seq: Option<i64>,
        limit: Option<usize>,
    ) -> Vec<Event> {
        let Some(log) = self.conversations.read().await.get(conversation).cloned() else {
            return Vec::new();
        };
        let log = log.lock();
        let it = log
            .events
            .iter()
            .filter(|e| after_seq.map(|s| e.seq > s).unwrap_or(true))
            .cloned();
        match limit {
            Some(n) => it.take(n).collect(),
            None => it.collect(),
        }
    }

    pub async fn get_event(&self, conversation: &str, turn: i64, event: i64) -> Option<Event> {
        let log = self.conversations.read().await.get(conversation).cloned()?;
        let log = log.lock();
        log.events
            .iter()
            .find(|e| e.turn == turn && e.event == event)
            .cloned()
    }
}

fn resolve_turn(head: &Head, event_type: EventType, requested: Option<i64>) -> Option<i64> {
    if let Some(t) = requested {
        return Some(t);
    }
    match event_type {
        EventType::Message => {
            if head.has_open_turn {
                Some(head.last_turn)
            } else {
                Some(head.last_turn + 1)
            }
        }
        EventType::Trace | EventType::System => {
            if head.has_open_turn {
                Some(head.last_turn)
            } else {
                None
            }
        }
    }
}

fn no_open_turn_error(event_type: EventType, conversation: &str, _head: &Head) -> Error {
    match event_type {
        EventType::Trace => Error::NoOpenTurn(conversation.to_string()),
        _ => Error::NoOpenTurn(conversation.to_string()),
    }
}

/// Peels raw attachment bytes off a message payload, storing each as its
/// own `Attachment` row owned by the event that introduced it, and
/// rewrites the in-payload copies down to references. Non-message payloads
/// pass through unchanged.
fn stage_attachments(
    log: &mut ConversationLog,
    payload: PayloadInput,
    conversation: &str,
    turn: i64,
    event_index: i64,
    created_by: &str,
) -> Payload {
    let PayloadInput::Message(input) = payload else {
        return match payload {
            PayloadInput::Trace(t) => Payload::Trace(t),
            PayloadInput::System(s) => Payload::System(s),
            PayloadInput::Message(_) => unreachable!(),
        };
    };

    let mut refs = Vec::with_capacity(input.attachments.len());
    for att in input.attachments {
        use base64::Engine;
        let id = att.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let content = base64::engine::general_purpose::STANDARD
            .decode(att.content.as_bytes())
            .unwrap_or_default();
        let row = Attachment {
            id: id.clone(),
            conversation: conversation.to_string(),
            turn,
            event: event_index,
            doc_ref: att.doc_ref.clone(),
            name: att.name.clone(),
            content_type: att.content_type.clone(),
            content,
            summary: att.summary.clone(),
            created_by_agent: created_by.to_string(),
            created_at: chrono::Utc::now(),
        };
        refs.push(AttachmentRef {
            id: id.clone(),
            name: att.name,
            content_type: att.content_type,
            summary: att.summary,
            doc_ref: att.doc_ref,
        });
        log.attachments.insert(id, row);
    }

    Payload::Message(MessagePayload {
        text: input.text,
        attachments: refs,
        outcome: input.outcome,
        client_request_id: input.client_request_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use orc_domain::conversation::{ConversationMeta, ConversationStatus};
    use orc_domain::event::{Finality, MessagePayloadInput};

    fn msg(text: &str, finality: Finality, agent: &str) -> AppendInput {
        AppendInput {
            conversation: String::new(),
            finality,
            agent_id: agent.to_string(),
            payload: PayloadInput::Message(MessagePayloadInput {
                text: text.to_string(),
                ..Default::default()
            }),
            turn: None,
        }
    }

    #[tokio::test]
    async fn basic_append_allocates_turn_and_seq() {
        let convs = ConversationStore::new(None);
        let conv = convs.create(ConversationMeta::default());
        let events = EventStore::new(None);

        let mut input = msg("hi", Finality::None, "A");
        input.conversation = conv.id.clone();
        let outcome = events.append_event(&convs, input).await.unwrap();
        match outcome {
            AppendOutcome::Appended(r) => {
                assert_eq!(r.seq, 1);
                assert_eq!(r.turn, 1);
                assert_eq!(r.event, 1);
            }
            AppendOutcome::Dropped => panic!("expected append"),
        }
    }

    #[tokio::test]
    async fn closing_turn_then_new_message_allocates_next_turn() {
        let convs = ConversationStore::new(None);
        let conv = convs.create(ConversationMeta::default());
        let events = EventStore::new(None);

        let mut a1 = msg("hi", Finality::Turn, "A");
        a1.conversation = conv.id.clone();
        events.append_event(&convs, a1).await.unwrap();

        let mut b1 = msg("hello", Finality::None, "B");
        b1.conversation = conv.id.clone();
        let outcome = events.append_event(&convs, b1).await.unwrap();
        assert_eq!(outcome, AppendOutcome::Appended(AppendResult { seq: 2, turn: 2, event: 1 }));
    }

    #[tokio::test]
    async fn trace_without_open_turn_fails() {
        let convs = ConversationStore::new(None);
        let conv = convs.create(ConversationMeta::default());
        let events = EventStore::new(None);

        let mut a1 = msg("hi", Finality::Turn, "A");
        a1.conversation = conv.id.clone();
        events.append_event(&convs, a1).await.unwrap();

        let trace = AppendInput {
            conversation: conv.id.clone(),
            finality: Finality::None,
            agent_id: "A".to_string(),
            payload: PayloadInput::Trace(orc_domain::event::TracePayload {
                kind: orc_domain::event::TraceKind::Thought,
                detail: serde_json::json!({}),
                client_request_id: None,
            }),
            turn: None,
        };
        let err = events.append_event(&convs, trace).await.unwrap_err();
        assert!(matches!(err, Error::NoOpenTurn(_)));
    }

    #[tokio::test]
    async fn system_event_without_open_turn_is_dropped_not_error() {
        let convs = ConversationStore::new(None);
        let conv = convs.create(ConversationMeta::default());
        let events = EventStore::new(None);

        let sys = AppendInput {
            conversation: conv.id.clone(),
            finality: Finality::None,
            agent_id: "system".to_string(),
            payload: PayloadInput::System(orc_domain::event::SystemPayload {
                kind: orc_domain::event::SystemKind::Note,
                detail: serde_json::Value::Null,
            }),
            turn: None,
        };
        let outcome = events.append_event(&convs, sys).await.unwrap();
        assert_eq!(outcome, AppendOutcome::Dropped);
    }

    #[tokio::test]
    async fn conversation_closed_rejects_further_appends() {
        let convs = ConversationStore::new(None);
        let conv = convs.create(ConversationMeta::default());
        let events = EventStore::new(None);

        let mut closer = msg("bye", Finality::Conversation, "A");
        closer.conversation = conv.id.clone();
        events.append_event(&convs, closer).await.unwrap();

        let mut next = msg("again", Finality::None, "A");
        next.conversation = conv.id.clone();
        let err = events.append_event(&convs, next).await.unwrap_err();
        assert!(matches!(err, Error::ConversationClosed(_)));
        assert_eq!(
            convs.get(&conv.id).unwrap().status,
            ConversationStatus::Completed
        );
    }

    #[tokio::test]
    async fn idempotent_replay_returns_original_coords() {
        let convs = ConversationStore::new(None);
        let conv = convs.create(ConversationMeta::default());
        let events = EventStore::new(None);

        let mut a1 = msg("hi", Finality::None, "A");
        a1.conversation = conv.id.clone();
        if let PayloadInput::Message(m) = &mut a1.payload {
            m.client_request_id = Some("r1".to_string());
        }
        let first = events.append_event(&convs, a1.clone()).await.unwrap();
        let second = events.append_event(&convs, a1).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(events.get_events(&conv.id, None, None).await.len(), 1);
    }

    #[tokio::test]
    async fn attachment_bytes_are_rewritten_to_references() {
        let convs = ConversationStore::new(None);
        let conv = convs.create(ConversationMeta::default());
        let events = EventStore::new(None);

        let input = AppendInput {
            conversation: conv.id.clone(),
            finality: Finality::None,
            agent_id: "A".to_string(),
            payload: PayloadInput::Message(MessagePayloadInput {
                text: "see attached".to_string(),
                attachments: vec![orc_domain::event::AttachmentInput {
                    id: None,
                    name: "x.txt".to_string(),
                    content_type: "text/plain".to_string(),
                    content: "aGVsbG8=".to_string(),
                    summary: None,
                    doc_ref: None,
                }],
                outcome: None,
                client_request_id: None,
            }),
            turn: None,
        };
        events.append_event(&convs, input).await.unwrap();

        let stored = events.get_events(&conv.id, None, None).await;
        let Payload::Message(m) = &stored[0].payload else {
            panic!("expected message payload");
        };
        assert_eq!(m.attachments.len(), 1);
        assert_eq!(m.attachments[0].name, "x.txt");
    }
}
