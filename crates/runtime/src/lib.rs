//! The agent runtime: a single stream → claim → act → close-turn loop used
//! identically by in-process agents (holding a direct `OrchestratorService`
//! reference) and remote agents (holding a JSON-RPC duplex client). Both
//! sides implement [`OrchestratorClient`]; neither owns the other, which is
//! how the agent/client/orchestrator cycle is broken — a runtime owner
//! holds both and outlives them.

use std::sync::Arc;

use async_trait::async_trait;
use orc_domain::event::{AppendResult, Event, EventType, Finality, MessagePayloadInput, TracePayload};
use orc_domain::guidance::GuidanceSeq;
use orc_domain::Result;
use tokio::sync::mpsc;

/// An item delivered by a conversation's event stream.
#[derive(Debug, Clone)]
pub enum StreamItem {
    Event(Event),
    Guidance(orc_domain::guidance::GuidanceEvent),
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub conversation: orc_domain::conversation::Conversation,
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, Copy)]
pub struct ClaimOutcome {
    pub ok: bool,
}

/// The narrow capability interface an agent's turn handler is given, plus
/// the stream/claim operations the runtime loop itself drives. Both the
/// in-process and remote implementations must satisfy this identically.
#[async_trait]
pub trait OrchestratorClient: Send + Sync {
    /// Opens (or reopens, transparently to the caller on reconnect) an
    /// event stream for a conversation starting strictly after `since_seq`.
    /// The returned receiver is expected to keep delivering across
    /// transport reconnects in the remote variant — retry/backoff is the
    /// client implementation's concern, not the loop's.
    async fn open_stream(
        &self,
        conversation: &str,
        include_guidance: bool,
        since_seq: Option<i64>,
    ) -> Result<mpsc::Receiver<StreamItem>>;

    async fn claim_turn(
        &self,
        conversation: &str,
        agent_id: &str,
        guidance_seq: GuidanceSeq,
    ) -> Result<ClaimOutcome>;

    async fn get_snapshot(&self, conversation: &str) -> Result<Snapshot>;

    async fn post_message(
        &self,
        conversation: &str,
        agent_id: &str,
        payload: MessagePayloadInput,
        finality: Finality,
        turn: Option<i64>,
    ) -> Result<AppendResult>;

    async fn post_trace(
        &self,
        conversation: &str,
        agent_id: &str,
        payload: TracePayload,
        turn: Option<i64>,
    ) -> Result<AppendResult>;

    fn now(&self) -> chrono::DateTime<chrono::Utc>;
}

/// Everything an agent's turn handler needs, built fresh for each claimed
/// turn.
pub struct AgentContext {
    pub conversation: String,
    pub agent_id: String,
    pub deadline: chrono::DateTime<chrono::Utc>,
    pub client: Arc<dyn OrchestratorClient>,
}

/// One turn's worth of behavior. Implementations write one or more
/// trace/message events and close with finality=turn (or =conversation).
#[async_trait]
pub trait Agent: Send + Sync {
    async fn handle_turn(&self, ctx: AgentContext) -> Result<()>;
}

/// Drives the stream → claim → act → close-turn loop described for the
/// Agent Runtime component. Exits once a message with
/// finality=conversation is observed.
pub async fn run_agent_loop(
    client: Arc<dyn OrchestratorClient>,
    agent: Arc<dyn Agent>,
    conversation: String,
    agent_id: String,
    idle_turn_ms: u64,
    since_seq: Option<i64>,
) -> Result<()> {
    let mut rx = client.open_stream(&conversation, true, since_seq).await?;

    while let Some(item) = rx.recv().await {
        match item {
            StreamItem::Event(event) => {
                if event.event_type == EventType::Message && event.finality == Finality::Conversation {
                    tracing::info!(conversation = %conversation, "conversation completed, exiting loop");
                    return Ok(());
                }
            }
            StreamItem::Guidance(guidance) => {
                if guidance.next_agent_id != agent_id {
                    continue;
                }
                let claimed = client
                    .claim_turn(&conversation, &agent_id, guidance.seq)
                    .await?;
                if !claimed.ok {
                    continue;
                }
                let ctx = AgentContext {
                    conversation: conversation.clone(),
                    agent_id: agent_id.clone(),
                    deadline: client.now() + chrono::Duration::milliseconds(idle_turn_ms as i64),
                    client: client.clone(),
                };
                agent.handle_turn(ctx).await?;
            }
        }
    }

    tracing::warn!(conversation = %conversation, "event stream ended without conversation completion");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use orc_domain::conversation::{Conversation, ConversationMeta, ConversationStatus};
    use orc_domain::event::{EventType, MessagePayload, Payload};
    use orc_domain::guidance::GuidanceEvent;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    struct FakeClient {
        tx: Mutex<Option<mpsc::Sender<StreamItem>>>,
        claims: AtomicUsize,
        posts: AtomicUsize,
    }

    #[async_trait]
    impl OrchestratorClient for FakeClient {
        async fn open_stream(
            &self,
            _conversation: &str,
            _include_guidance: bool,
            _since_seq: Option<i64>,
        ) -> Result<mpsc::Receiver<StreamItem>> {
            let (tx, rx) = mpsc::channel(8);
            *self.tx.lock().await = Some(tx);
            Ok(rx)
        }

        async fn claim_turn(
            &self,
            _conversation: &str,
            _agent_id: &str,
            _guidance_seq: GuidanceSeq,
        ) -> Result<ClaimOutcome> {
            self.claims.fetch_add(1, Ordering::SeqCst);
            Ok(ClaimOutcome { ok: true })
        }

        async fn get_snapshot(&self, conversation: &str) -> Result<Snapshot> {
            Ok(Snapshot {
                conversation: Conversation {
                    id: conversation.to_string(),
                    meta: ConversationMeta::default(),
                    status: ConversationStatus::Active,
                    created_at: chrono::Utc::now(),
                    updated_at: chrono::Utc::now(),
                },
                events: vec![],
            })
        }

        async fn post_message(
            &self,
            _conversation: &str,
            _agent_id: &str,
            _payload: MessagePayloadInput,
            _finality: Finality,
            _turn: Option<i64>,
        ) -> Result<AppendResult> {
            self.posts.fetch_add(1, Ordering::SeqCst);
            Ok(AppendResult { seq: 1, turn: 1, event: 1 })
        }

        async fn post_trace(
            &self,
            _conversation: &str,
            _agent_id: &str,
            _payload: TracePayload,
            _turn: Option<i64>,
        ) -> Result<AppendResult> {
            Ok(AppendResult { seq: 1, turn: 1, event: 1 })
        }

        fn now(&self) -> chrono::DateTime<chrono::Utc> {
            chrono::Utc::now()
        }
    }

    struct EchoAgent;

    #[async_trait]
    impl Agent for EchoAgent {
        async fn handle_turn(&self, ctx: AgentContext) -> Result<()> {
            ctx.client
                .post_message(
                    &ctx.conversation,
                    &ctx.agent_id,
                    MessagePayloadInput { text: "ok".to_string(), ..Default::default() },
                    Finality::Turn,
                    None,
                )
                .await?;
            Ok(())
        }
    }

    fn closing_event(seq: i64) -> Event {
        Event {
            seq,
            conversation: "c1".to_string(),
            turn: 1,
            event: 1,
            event_type: EventType::Message,
            finality: Finality::Conversation,
            agent_id: "A".to_string(),
            payload: Payload::Message(MessagePayload::default()),
            ts: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn claims_on_matching_guidance_and_exits_on_completion() {
        let client = Arc::new(FakeClient {
            tx: Mutex::new(None),
            claims: AtomicUsize::new(0),
            posts: AtomicUsize::new(0),
        });
        let agent = Arc::new(EchoAgent);

        let loop_client = client.clone();
        let handle = tokio::spawn(async move {
            run_agent_loop(loop_client, agent, "c1".to_string(), "B".to_string(), 30_000, None).await
        });

        // Wait for the loop to open its stream.
        let tx = loop {
            if let Some(tx) = client.tx.lock().await.clone() {
                break tx;
            }
            tokio::task::yield_now().await;
        };

        tx.send(StreamItem::Guidance(GuidanceEvent {
            conversation: "c1".to_string(),
            seq: GuidanceSeq::after_event(1),
            next_agent_id: "B".to_string(),
            deadline_ms: 30_000,
        }))
        .await
        .unwrap();
        tx.send(StreamItem::Event(closing_event(2))).await.unwrap();
        drop(tx);

        handle.await.unwrap().unwrap();
        assert_eq!(client.claims.load(Ordering::SeqCst), 1);
        assert_eq!(client.posts.load(Ordering::SeqCst), 1);
    }
}
