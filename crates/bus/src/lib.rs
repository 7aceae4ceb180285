//! In-memory, single-process fanout of events and guidance to filtered
//! listeners. One bounded queue per subscription; overrun behavior is a
//! configuration knob (see [`orc_domain::config::BackpressurePolicy`]).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use orc_domain::config::BackpressurePolicy;
use orc_domain::event::{Event, EventType};
use orc_domain::guidance::GuidanceEvent;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use uuid::Uuid;

/// What a listener receives. `Overrun` is sent best-effort immediately
/// before the subscription's queue is torn down.
#[derive(Debug, Clone)]
pub enum Delivery {
    Event(Event),
    Guidance(GuidanceEvent),
    Overrun,
}

#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    pub types: Option<HashSet<EventType>>,
    pub agents: Option<HashSet<String>>,
}

impl SubscriptionFilter {
    fn admits(&self, event: &Event) -> bool {
        let type_ok = self
            .types
            .as_ref()
            .map(|ts| ts.contains(&event.event_type))
            .unwrap_or(true);
        let agent_ok = self
            .agents
            .as_ref()
            .map(|ags| ags.contains(&event.agent_id))
            .unwrap_or(true);
        type_ok && agent_ok
    }
}

struct Subscription {
    conversation: String,
    filter: SubscriptionFilter,
    include_guidance: bool,
    tx: mpsc::Sender<Delivery>,
}

pub struct SubscriptionBus {
    capacity: usize,
    backpressure: BackpressurePolicy,
    subs: RwLock<HashMap<String, Subscription>>,
}

impl SubscriptionBus {
    pub fn new(capacity: usize, backpressure: BackpressurePolicy) -> Arc<Self> {
        Arc::new(SubscriptionBus {
            capacity,
            backpressure,
            subs: RwLock::new(HashMap::new()),
        })
    }

    pub fn subscribe(
        &self,
        conversation: &str,
        filter: SubscriptionFilter,
        include_guidance: bool,
    ) -> (String, mpsc::Receiver<Delivery>) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = Uuid::new_v4().to_string();
        self.subs.write().insert(
            id.clone(),
            Subscription {
                conversation: conversation.to_string(),
                filter,
                include_guidance,
                tx,
            },
        );
        tracing::info!(sub_id = %id, conversation, "subscribed");
        (id, rx)
    }

    /// Removes the subscription; in-flight deliveries already enqueued are
    /// unaffected, but no further ones are attempted.
    pub fn unsubscribe(&self, sub_id: &str) {
        if self.subs.write().remove(sub_id).is_some() {
            tracing::info!(sub_id, "unsubscribed");
        }
    }

    /// Drops every subscription for a conversation, e.g. once it completes.
    pub fn unsubscribe_conversation(&self, conversation: &str) {
        self.subs.write().retain(|_, s| s.conversation != conversation);
    }

    /// Delivers `event` to every subscription whose conversation and filter
    /// admit it, in the order subscriptions happen to iterate (delivery
    /// order *within* one subscription is what matters, and that is always
    /// increasing `seq` because publishers call this serially per
    /// conversation — see the Event Store's per-conversation lock).
    pub async fn publish(&self, event: Event) {
        let targets: Vec<(String, mpsc::Sender<Delivery>)> = {
            let subs = self.subs.read();
            subs.iter()
                .filter(|(_, s)| s.conversation == event.conversation && s.filter.admits(&event))
                .map(|(id, s)| (id.clone(), s.tx.clone()))
                .collect()
        };
        for (id, tx) in targets {
            self.deliver(&id, tx, Delivery::Event(event.clone())).await;
        }
    }

    /// Delivers guidance only to subscriptions with `include_guidance=true`.
    /// Callers publish the closing event first, then its guidance — see
    /// `OrchestratorService::append_event` — so per-subscription ordering
    /// guarantees the guidance is observed after the event that triggered
    /// it.
    pub async fn publish_guidance(&self, guidance: GuidanceEvent) {
        let targets: Vec<(String, mpsc::Sender<Delivery>)> = {
            let subs = self.subs.read();
            subs.iter()
                .filter(|(_, s)| s.conversation == guidance.conversation && s.include_guidance)
                .map(|(id, s)| (id.clone(), s.tx.clone()))
                .collect()
        };
        for (id, tx) in targets {
            self.deliver(&id, tx, Delivery::Guidance(guidance.clone())).await;
        }
    }

    async fn deliver(&self, sub_id: &str, tx: mpsc::Sender<Delivery>, item: Delivery) {
        match self.backpressure {
            BackpressurePolicy::Blocking => {
                if tx.send(item).await.is_err() {
                    self.unsubscribe(sub_id);
                }
            }
            BackpressurePolicy::DropSlowest => {
                if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(item) {
                    tracing::warn!(sub_id, "subscriber overrun, closing");
                    let _ = tx.try_send(Delivery::Overrun);
                    self.unsubscribe(sub_id);
                }
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subs.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orc_domain::event::{EventType, Finality, MessagePayload, Payload};

    fn sample_event(conversation: &str, seq: i64) -> Event {
        Event {
            seq,
            conversation: conversation.to_string(),
            turn: 1,
            event: 1,
            event_type: EventType::Message,
            finality: Finality::None,
            agent_id: "A".to_string(),
            payload: Payload::Message(MessagePayload {
                text: "hi".to_string(),
                ..Default::default()
            }),
            ts: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn delivers_only_to_matching_conversation() {
        let bus = SubscriptionBus::new(8, BackpressurePolicy::Blocking);
        let (_id, mut rx) = bus.subscribe("c1", SubscriptionFilter::default(), false);
        bus.publish(sample_event("c2", 1)).await;
        bus.publish(sample_event("c1", 2)).await;

        let got = rx.recv().await.unwrap();
        match got {
            Delivery::Event(e) => assert_eq!(e.seq, 2),
            _ => panic!("expected event"),
        }
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = SubscriptionBus::new(8, BackpressurePolicy::Blocking);
        let (id, mut rx) = bus.subscribe("c1", SubscriptionFilter::default(), false);
        bus.unsubscribe(&id);
        bus.publish(sample_event("c1", 1)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn drop_slowest_overruns_then_closes() {
        let bus = SubscriptionBus::new(1, BackpressurePolicy::DropSlowest);
        let (_id, mut rx) = bus.subscribe("c1", SubscriptionFilter::default(), false);
        bus.publish(sample_event("c1", 1)).await;
        bus.publish(sample_event("c1", 2)).await;
        bus.publish(sample_event("c1", 3)).await;

        // First delivery fit; the rest overran and the sub was torn down.
        assert!(matches!(rx.recv().await, Some(Delivery::Event(_))));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn guidance_only_reaches_opted_in_subscribers() {
        let bus = SubscriptionBus::new(8, BackpressurePolicy::Blocking);
        let (_id, mut rx) = bus.subscribe("c1", SubscriptionFilter::default(), true);
        bus.publish_guidance(GuidanceEvent {
            conversation: "c1".to_string(),
            seq: orc_domain::guidance::GuidanceSeq::after_event(5),
            next_agent_id: "B".to_string(),
            deadline_ms: 30_000,
        })
        .await;
        assert!(matches!(rx.recv().await, Some(Delivery::Guidance(_))));
    }
}
