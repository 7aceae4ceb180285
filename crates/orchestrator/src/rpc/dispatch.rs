use std::collections::HashMap;

use orc_bus::Delivery;
use orc_protocol::error_codes::{to_rpc_error, INVALID_PARAMS, METHOD_NOT_FOUND};
use orc_protocol::methods::{
    name, ClaimTurnParams, ClaimTurnResult, CreateConversationParams, CreateConversationResult,
    EventsPage, GetConversationParams, GetEventsPageParams, OkResult, SendMessageParams,
    SendResult, SendTraceParams, Snapshot, SubscribeParams, SubscribeResult,
    UnsubscribeParams,
};
use orc_protocol::{Notification, OutboundFrame, Request, Response, RpcError};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::state::AppState;

pub struct Connection {
    state: AppState,
    out_tx: mpsc::Sender<OutboundFrame>,
    forwarders: HashMap<String, JoinHandle<()>>,
}

impl Connection {
    pub fn new(state: AppState, out_tx: mpsc::Sender<OutboundFrame>) -> Self {
        Connection { state, out_tx, forwarders: HashMap::new() }
    }

    pub async fn handle_request(&mut self, req: Request) {
        let result = self.dispatch(&req.method, req.params.unwrap_or(Value::Null)).await;
        let frame = match result {
            Ok(value) => OutboundFrame::Response(Response::ok(req.id, value)),
            Err(e) => OutboundFrame::Response(Response::err(req.id, e)),
        };
        let _ = self.out_tx.send(frame).await;
    }

    async fn dispatch(&mut self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            name::SUBSCRIBE => self.subscribe(parse(params)?).await,
            name::UNSUBSCRIBE => self.unsubscribe(parse(params)?),
            name::GET_CONVERSATION => self.get_conversation(parse(params)?).await,
            name::GET_EVENTS_PAGE => self.get_events_page(parse(params)?).await,
            name::SEND_MESSAGE => self.send_message(parse(params)?).await,
            name::SEND_TRACE => self.send_trace(parse(params)?).await,
            name::CLAIM_TURN => self.claim_turn(parse(params)?).await,
            name::CREATE_CONVERSATION => self.create_conversation(parse(params)?),
            other => Err(RpcError {
                code: METHOD_NOT_FOUND,
                message: format!("unknown method: {other}"),
                data: None,
            }),
        }
    }

    async fn subscribe(&mut self, params: SubscribeParams) -> Result<Value, RpcError> {
        // Register with the bus before replaying the backlog, so no event
        // published between registration and the backlog fetch below is
        // missed. `last_replayed` then lets the forwarder drop whatever the
        // live feed redelivers that the backlog already covered.
        let (sub_id, mut rx) = self.state.service.subscribe(
            &params.conversation_id,
            orc_bus::SubscriptionFilter::default(),
            params.include_guidance,
        );

        let mut last_replayed = params.since_seq;
        if let Some(since_seq) = params.since_seq {
            let backlog = self
                .state
                .service
                .get_events_page(&params.conversation_id, Some(since_seq), None)
                .await;
            for event in backlog {
                last_replayed = Some(last_replayed.map_or(event.seq, |s| s.max(event.seq)));
                let notification = Notification::new(name::EVENT, serde_json::to_value(event).unwrap());
                if self.out_tx.send(OutboundFrame::Notification(notification)).await.is_err() {
                    return Ok(serde_json::to_value(SubscribeResult { sub_id }).unwrap());
                }
            }
        }

        let out_tx = self.out_tx.clone();
        let forward_id = sub_id.clone();
        let handle = tokio::spawn(async move {
            while let Some(delivery) = rx.recv().await {
                let notification = match delivery {
                    Delivery::Event(event) => {
                        if last_replayed.is_some_and(|s| event.seq <= s) {
                            continue;
                        }
                        Notification::new(name::EVENT, serde_json::to_value(event).unwrap())
                    }
                    Delivery::Guidance(guidance) => {
                        Notification::new(name::GUIDANCE, serde_json::to_value(guidance).unwrap())
                    }
                    Delivery::Overrun => break,
                };
                if out_tx.send(OutboundFrame::Notification(notification)).await.is_err() {
                    break;
                }
            }
            tracing::debug!(sub_id = %forward_id, "subscription forwarder ended");
        });
        self.forwarders.insert(sub_id.clone(), handle);
        Ok(serde_json::to_value(SubscribeResult { sub_id }).unwrap())
    }

    fn unsubscribe(&mut self, params: UnsubscribeParams) -> Result<Value, RpcError> {
        self.state.service.unsubscribe(&params.sub_id);
        if let Some(handle) = self.forwarders.remove(&params.sub_id) {
            handle.abort();
        }
        Ok(serde_json::to_value(OkResult { ok: true }).unwrap())
    }

    async fn get_conversation(&self, params: GetConversationParams) -> Result<Value, RpcError> {
        let (conversation, events) = self
            .state
            .service
            .get_snapshot(&params.conversation_id)
            .await
            .map_err(|e| to_rpc_error(&e))?;
        Ok(serde_json::to_value(Snapshot { conversation, events }).unwrap())
    }

    async fn get_events_page(&self, params: GetEventsPageParams) -> Result<Value, RpcError> {
        let events = self
            .state
            .service
            .get_events_page(&params.conversation_id, params.after_seq, params.limit)
            .await;
        Ok(serde_json::to_value(EventsPage { events }).unwrap())
    }

    async fn send_message(&self, params: SendMessageParams) -> Result<Value, RpcError> {
        let result: SendResult = self
            .state
            .service
            .send_message(params.conversation_id, params.agent_id, params.message_payload, params.finality, params.turn)
            .await
            .map_err(|e| to_rpc_error(&e))?;
        Ok(serde_json::to_value(result).unwrap())
    }

    async fn send_trace(&self, params: SendTraceParams) -> Result<Value, RpcError> {
        let result: SendResult = self
            .state
            .service
            .send_trace(params.conversation_id, params.agent_id, params.trace_payload, params.turn)
            .await
            .map_err(|e| to_rpc_error(&e))?;
        Ok(serde_json::to_value(result).unwrap())
    }

    async fn claim_turn(&self, params: ClaimTurnParams) -> Result<Value, RpcError> {
        let outcome = self
            .state
            .service
            .claim_turn(&params.conversation_id, &params.agent_id, params.guidance_seq)
            .await;
        Ok(serde_json::to_value(ClaimTurnResult { ok: outcome.ok, reason: outcome.reason }).unwrap())
    }

    fn create_conversation(&self, params: CreateConversationParams) -> Result<Value, RpcError> {
        let conversation = self.state.service.create_conversation(params.meta);
        Ok(serde_json::to_value(CreateConversationResult { id: conversation.id }).unwrap())
    }

    /// Unsubscribes every live subscription this connection opened, so a
    /// dropped socket doesn't leak bus fanout slots.
    pub fn teardown(&mut self) {
        for (sub_id, handle) in self.forwarders.drain() {
            self.state.service.unsubscribe(&sub_id);
            handle.abort();
        }
    }
}

fn parse<T: DeserializeOwned>(params: Value) -> Result<T, RpcError> {
    serde_json::from_value(params).map_err(|e| RpcError {
        code: INVALID_PARAMS,
        message: e.to_string(),
        data: None,
    })
}
