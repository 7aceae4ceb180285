//! Composition point: holds the Conversation/Event/Claim stores, the
//! Subscription Bus and the scheduling policy, and exposes the operations
//! the duplex RPC server and the watchdog call into.

use std::collections::HashMap;
use std::sync::Arc;

use orc_domain::conversation::{Conversation, ConversationFilter, ConversationMeta};
use orc_domain::event::{
    AppendInput, AppendResult, Event, EventType, Finality, MessagePayloadInput, PayloadInput,
    SystemKind, SystemPayload, TracePayload,
};
use orc_domain::guidance::GuidanceSeq;
use orc_domain::{Error, Result};
use orc_bus::{Delivery, SubscriptionBus, SubscriptionFilter};
use orc_scheduler::{AlternationPolicy, PolicySnapshot, SchedulingPolicy};
use orc_store::{AppendOutcome, ClaimStore, ConversationStore, EventStore};
use tokio::sync::mpsc;

pub struct ClaimTurnOutcome {
    pub ok: bool,
    pub reason: Option<String>,
}

pub struct OrchestratorService {
    pub config: Arc<orc_domain::config::Config>,
    pub conversations: Arc<ConversationStore>,
    pub events: Arc<EventStore>,
    pub claims: Arc<ClaimStore>,
    pub bus: Arc<SubscriptionBus>,
    policy: Arc<dyn SchedulingPolicy>,
}

impl OrchestratorService {
    pub fn new(config: Arc<orc_domain::config::Config>) -> Self {
        let state_dir = Some(config.state_dir.clone());
        OrchestratorService {
            conversations: Arc::new(ConversationStore::new(state_dir.clone())),
            events: Arc::new(EventStore::new(state_dir)),
            claims: Arc::new(ClaimStore::new()),
            bus: SubscriptionBus::new(config.subscription_queue_capacity, config.backpressure),
            policy: Arc::new(AlternationPolicy),
            config,
        }
    }

    pub fn create_conversation(&self, meta: ConversationMeta) -> Conversation {
        self.conversations.create(meta)
    }

    pub fn get_conversation(&self, conversation_id: &str) -> Result<Conversation> {
        self.conversations
            .get(conversation_id)
            .ok_or_else(|| Error::ConversationNotFound(conversation_id.to_string()))
    }

    pub fn list_conversations(&self, filter: ConversationFilter) -> Vec<Conversation> {
        self.conversations.list(filter)
    }

    pub async fn get_snapshot(&self, conversation_id: &str) -> Result<(Conversation, Vec<Event>)> {
        let conversation = self.get_conversation(conversation_id)?;
        let events = self.events.get_events(conversation_id, None, None).await;
        Ok((conversation, events))
    }

    pub async fn get_events_page(
        &self,
        conversation_id: &str,
        after_seq: Option<i64>,
        limit: Option<usize>,
    ) -> Vec<Event> {
        self.events.get_events(conversation_id, after_seq, limit).await
    }

    pub fn subscribe(
        &self,
        conversation_id: &str,
        filter: SubscriptionFilter,
        include_guidance: bool,
    ) -> (String, mpsc::Receiver<Delivery>) {
        self.bus.subscribe(conversation_id, filter, include_guidance)
    }

    pub fn unsubscribe(&self, sub_id: &str) {
        self.bus.unsubscribe(sub_id);
    }

    pub async fn send_message(
        &self,
        conversation_id: String,
        agent_id: String,
        payload: MessagePayloadInput,
        finality: Finality,
        turn: Option<i64>,
    ) -> Result<AppendResult> {
        let input = AppendInput {
            conversation: conversation_id,
            finality,
            agent_id,
            payload: PayloadInput::Message(payload),
            turn,
        };
        match self.commit(input).await? {
            AppendOutcome::Appended(result) => Ok(result),
            AppendOutcome::Dropped => unreachable!("message events are never silently dropped"),
        }
    }

    pub async fn send_trace(
        &self,
        conversation_id: String,
        agent_id: String,
        payload: TracePayload,
        turn: Option<i64>,
    ) -> Result<AppendResult> {
        let input = AppendInput {
            conversation: conversation_id,
            finality: Finality::None,
            agent_id,
            payload: PayloadInput::Trace(payload),
            turn,
        };
        match self.commit(input).await? {
            AppendOutcome::Appended(result) => Ok(result),
            AppendOutcome::Dropped => unreachable!("trace events are never silently dropped"),
        }
    }

    pub async fn claim_turn(
        &self,
        conversation_id: &str,
        agent_id: &str,
        guidance_seq: GuidanceSeq,
    ) -> ClaimTurnOutcome {
        let expires_at =
            chrono::Utc::now() + chrono::Duration::milliseconds(self.config.idle_turn_ms as i64);
        match self.claims.claim(conversation_id, guidance_seq, agent_id, expires_at) {
            orc_domain::claim::ClaimOutcome::Contended => ClaimTurnOutcome {
                ok: false,
                reason: Some("CLAIM_CONTENDED".to_string()),
            },
            orc_domain::claim::ClaimOutcome::Claimed | orc_domain::claim::ClaimOutcome::AlreadyMine => {
                self.emit_system(
                    conversation_id,
                    SystemKind::TurnClaimed,
                    serde_json::json!({ "guidanceSeq": guidance_seq.to_string(), "agentId": agent_id }),
                )
                .await;
                ClaimTurnOutcome { ok: true, reason: None }
            }
        }
    }

    /// Best-effort system event emission. Advisory only: dropped silently
    /// when no turn is open, and any append error is logged but never
    /// surfaced — callers (claimTurn, the watchdog) never fail on this.
    pub async fn emit_system(&self, conversation_id: &str, kind: SystemKind, detail: serde_json::Value) {
        let input = AppendInput {
            conversation: conversation_id.to_string(),
            finality: Finality::None,
            agent_id: "system".to_string(),
            payload: PayloadInput::System(SystemPayload { kind, detail }),
            turn: None,
        };
        if let Err(e) = self.commit(input).await {
            tracing::warn!(conversation = conversation_id, error = %e, "system event append failed");
        }
    }

    async fn commit(&self, input: AppendInput) -> Result<AppendOutcome> {
        let conversation = input.conversation.clone();
        let outcome = self.events.append_event(&self.conversations, input).await?;
        if let AppendOutcome::Appended(result) = &outcome {
            if let Some(event) = self.events.get_event(&conversation, result.turn, result.event).await {
                self.bus.publish(event.clone()).await;
                match event.finality {
                    Finality::Conversation => {
                        self.claims.delete_all_for(&conversation);
                        self.bus.unsubscribe_conversation(&conversation);
                    }
                    Finality::Turn => {
                        self.claims.delete_all_for(&conversation);
                        self.maybe_emit_guidance(&event).await;
                    }
                    Finality::None => {}
                }
            }
        }
        Ok(outcome)
    }

    async fn maybe_emit_guidance(&self, closing_event: &Event) {
        let Some(conversation) = self.conversations.get(&closing_event.conversation) else {
            return;
        };
        let history = self.events.get_events(&closing_event.conversation, None, None).await;
        let mut last_spoken_seq = HashMap::new();
        for event in &history {
            if event.event_type == EventType::Message {
                last_spoken_seq.insert(event.agent_id.clone(), event.seq);
            }
        }
        let snapshot = PolicySnapshot {
            conversation: &closing_event.conversation,
            participants: &conversation.meta.participants,
            last_spoken_seq: &last_spoken_seq,
            idle_turn_ms: self.config.idle_turn_ms,
        };
        if let Some(guidance) = self.policy.decide(&snapshot, closing_event) {
            self.bus.publish_guidance(guidance).await;
        }
    }

    /// Reclaims every expired claim, emitting `claim_expired` for each.
    /// Called by the watchdog task; never returns an error to its caller.
    pub async fn sweep_expired_claims(&self) -> usize {
        let now = chrono::Utc::now();
        let expired = self.claims.get_expired(now);
        for claim in &expired {
            self.claims.delete(&claim.conversation, claim.guidance_seq);
            self.emit_system(
                &claim.conversation,
                SystemKind::ClaimExpired,
                serde_json::json!({
                    "guidanceSeq": claim.guidance_seq.to_string(),
                    "agentId": claim.agent_id,
                }),
            )
            .await;
        }
        expired.len()
    }

    /// Unsubscribes every listener. Called once on graceful shutdown; the
    /// watchdog loop itself is stopped by aborting its task handle.
    pub fn shutdown(&self) {
        for conversation in self.conversations.list(ConversationFilter::default()) {
            self.bus.unsubscribe_conversation(&conversation.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orc_domain::conversation::{Participant, ParticipantKind};

    fn service() -> OrchestratorService {
        OrchestratorService::new(Arc::new(orc_domain::config::Config::default()))
    }

    fn participant(id: &str) -> Participant {
        Participant {
            agent_id: id.to_string(),
            kind: ParticipantKind::External,
            agent_class: None,
            config: None,
        }
    }

    #[tokio::test]
    async fn closing_a_turn_emits_guidance_to_subscribers() {
        let svc = service();
        let conv = svc.create_conversation(ConversationMeta {
            participants: vec![participant("A"), participant("B")],
            ..Default::default()
        });
        let (_id, mut rx) = svc.subscribe(&conv.id, SubscriptionFilter::default(), true);

        svc.send_message(
            conv.id.clone(),
            "A".to_string(),
            MessagePayloadInput { text: "hi".to_string(), ..Default::default() },
            Finality::Turn,
            None,
        )
        .await
        .unwrap();

        assert!(matches!(rx.recv().await, Some(Delivery::Event(_))));
        match rx.recv().await {
            Some(Delivery::Guidance(g)) => assert_eq!(g.next_agent_id, "B"),
            other => panic!("expected guidance, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn claim_turn_contends_on_second_caller() {
        let svc = service();
        let conv = svc.create_conversation(ConversationMeta::default());
        let seq = GuidanceSeq::after_event(1);
        let first = svc.claim_turn(&conv.id, "B", seq).await;
        assert!(first.ok);
        let second = svc.claim_turn(&conv.id, "C", seq).await;
        assert!(!second.ok);
        assert_eq!(second.reason.as_deref(), Some("CLAIM_CONTENDED"));
    }

    #[tokio::test]
    async fn expired_claim_is_swept_and_reclaimable() {
        let svc = service();
        let conv = svc.create_conversation(ConversationMeta::default());
        let seq = GuidanceSeq::after_event(1);
        svc.claims.claim(&conv.id, seq, "B", chrono::Utc::now() - chrono::Duration::seconds(1));
        assert_eq!(svc.sweep_expired_claims().await, 1);
        let reclaim = svc.claim_turn(&conv.id, "C", seq).await;
        assert!(reclaim.ok);
    }
}
