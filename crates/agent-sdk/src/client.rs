//! Duplex RPC client — manages the WebSocket lifecycle, request/response
//! correlation, and per-conversation subscription replay across reconnects.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use orc_domain::event::{AppendResult, MessagePayloadInput, TracePayload};
use orc_domain::guidance::GuidanceSeq;
use orc_domain::{Error as DomainError, Result as DomainResult};
use orc_protocol::error_codes;
use orc_protocol::methods::{self, name};
use orc_protocol::{OutboundFrame, Request, RpcError};
use orc_runtime::{ClaimOutcome, OrchestratorClient, Snapshot, StreamItem};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;

use crate::reconnect::ReconnectBackoff;
use crate::types::ClientError;

struct SubscriptionState {
    include_guidance: bool,
    last_seq: Option<i64>,
    tx: mpsc::Sender<StreamItem>,
}

#[derive(Default)]
struct Shared {
    next_id: AtomicI64,
    pending: Mutex<HashMap<i64, oneshot::Sender<Result<Value, RpcError>>>>,
    out_tx: Mutex<Option<mpsc::Sender<Request>>>,
    subs: Mutex<HashMap<String, SubscriptionState>>,
}

/// A connected (or reconnecting) duplex client for one orchestrator.
///
/// Build via [`crate::AgentClientBuilder`]. Implements
/// `orc_runtime::OrchestratorClient`, so it plugs directly into
/// `orc_runtime::run_agent_loop` for remote agents.
pub struct AgentClient {
    shared: Arc<Shared>,
}

impl AgentClient {
    pub fn builder() -> crate::AgentClientBuilder {
        crate::AgentClientBuilder::new()
    }

    pub(crate) fn connect(url: String, reconnect: ReconnectBackoff, ping_interval: Duration) -> Arc<Self> {
        let shared = Arc::new(Shared::default());
        tokio::spawn(connection_loop(url, shared.clone(), reconnect, ping_interval));
        Arc::new(AgentClient { shared })
    }

    async fn call<P: serde::Serialize, R: DeserializeOwned>(&self, method: &str, params: P) -> Result<R, ClientError> {
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(id, tx);

        let req = Request::new(Value::from(id), method, Some(serde_json::to_value(params)?));
        let out_tx = self.shared.out_tx.lock().clone().ok_or(ClientError::Disconnected)?;
        out_tx.send(req).await.map_err(|_| ClientError::Disconnected)?;

        match rx.await {
            Ok(Ok(value)) => Ok(serde_json::from_value(value)?),
            Ok(Err(e)) => Err(ClientError::Rpc { code: e.code, message: e.message }),
            Err(_) => Err(ClientError::Disconnected),
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Other(e.into())
    }
}

fn rpc_error_to_domain(e: ClientError) -> DomainError {
    if let ClientError::Rpc { code, message } = &e {
        let conversation_ish = message.clone();
        return match *code {
            error_codes::CONVERSATION_NOT_FOUND => DomainError::ConversationNotFound(conversation_ish),
            error_codes::CONVERSATION_CLOSED => DomainError::ConversationClosed(conversation_ish),
            error_codes::NO_OPEN_TURN => DomainError::NoOpenTurn(conversation_ish),
            _ => DomainError::Other(message.clone()),
        };
    }
    DomainError::Other(e.to_string())
}

#[async_trait]
impl OrchestratorClient for AgentClient {
    async fn open_stream(
        &self,
        conversation: &str,
        include_guidance: bool,
        since_seq: Option<i64>,
    ) -> DomainResult<mpsc::Receiver<StreamItem>> {
        let (tx, rx) = mpsc::channel(256);
        self.shared.subs.lock().insert(
            conversation.to_string(),
            SubscriptionState { include_guidance, last_seq: since_seq, tx },
        );
        let params = methods::SubscribeParams {
            conversation_id: conversation.to_string(),
            include_guidance,
            since_seq,
        };
        let _: methods::SubscribeResult = self.call(name::SUBSCRIBE, params).await.map_err(rpc_error_to_domain)?;
        Ok(rx)
    }

    async fn claim_turn(&self, conversation: &str, agent_id: &str, guidance_seq: GuidanceSeq) -> DomainResult<ClaimOutcome> {
        let params = methods::ClaimTurnParams {
            conversation_id: conversation.to_string(),
            agent_id: agent_id.to_string(),
            guidance_seq,
        };
        let result: methods::ClaimTurnResult = self.call(name::CLAIM_TURN, params).await.map_err(rpc_error_to_domain)?;
        Ok(ClaimOutcome { ok: result.ok })
    }

    async fn get_snapshot(&self, conversation: &str) -> DomainResult<Snapshot> {
        let params = methods::GetConversationParams {
            conversation_id: conversation.to_string(),
            include_scenario: false,
        };
        let result: methods::Snapshot = self.call(name::GET_CONVERSATION, params).await.map_err(rpc_error_to_domain)?;
        Ok(Snapshot { conversation: result.conversation, events: result.events })
    }

    async fn post_message(
        &self,
        conversation: &str,
        agent_id: &str,
        payload: MessagePayloadInput,
        finality: orc_domain::event::Finality,
        turn: Option<i64>,
    ) -> DomainResult<AppendResult> {
        let params = methods::SendMessageParams {
            conversation_id: conversation.to_string(),
            agent_id: agent_id.to_string(),
            message_payload: payload,
            finality,
            turn,
        };
        self.call(name::SEND_MESSAGE, params).await.map_err(rpc_error_to_domain)
    }

    async fn post_trace(
        &self,
        conversation: &str,
        agent_id: &str,
        payload: TracePayload,
        turn: Option<i64>,
    ) -> DomainResult<AppendResult> {
        let params = methods::SendTraceParams {
            conversation_id: conversation.to_string(),
            agent_id: agent_id.to_string(),
            trace_payload: payload,
            turn,
        };
        self.call(name::SEND_TRACE, params).await.map_err(rpc_error_to_domain)
    }

    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }
}

/// Owns one physical connection's lifecycle: connect, handshake, message
/// loop, and reconnect-with-backoff on drop. Runs for the lifetime of the
/// `AgentClient`.
async fn connection_loop(url: String, shared: Arc<Shared>, reconnect: ReconnectBackoff, ping_interval: Duration) {
    let mut attempt: u32 = 0;
    loop {
        match connect_once(&url, &shared, ping_interval).await {
            Ok(()) => {
                tracing::info!(%url, "connection closed gracefully");
                attempt = 0;
            }
            Err(e) => {
                tracing::warn!(%url, attempt, error = %e, "connection lost");
            }
        }

        *shared.out_tx.lock() = None;

        if reconnect.should_give_up(attempt) {
            tracing::error!(attempts = attempt, "max reconnect attempts exhausted, giving up");
            fail_all_pending(&shared, ClientError::ReconnectExhausted(attempt));
            return;
        }

        let delay = reconnect.delay_for_attempt(attempt);
        tracing::info!(delay_ms = delay.as_millis() as u64, attempt = attempt + 1, "reconnecting");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

fn fail_all_pending(shared: &Shared, _reason: ClientError) {
    for (_, tx) in shared.pending.lock().drain() {
        let _ = tx.send(Err(RpcError { code: error_codes::TRANSPORT_DISCONNECT, message: "transport disconnected".into(), data: None }));
    }
}

async fn connect_once(url: &str, shared: &Arc<Shared>, ping_interval: Duration) -> Result<(), ClientError> {
    let (ws, _response) = tokio_tungstenite::connect_async(url).await.map_err(|e| ClientError::WebSocket(e.to_string()))?;
    let (mut sink, mut stream) = ws.split();

    let welcome = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(Ok(msg)) = stream.next().await {
            if let Message::Text(text) = msg {
                if let Ok(OutboundFrame::Notification(n)) = serde_json::from_str::<OutboundFrame>(&text) {
                    if n.method == name::WELCOME {
                        return Ok(());
                    }
                }
            }
        }
        Err(ClientError::Handshake("connection closed before welcome".into()))
    })
    .await;
    match welcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(e),
        Err(_) => return Err(ClientError::Handshake("welcome timeout".into())),
    }
    tracing::info!(%url, "orchestrator welcomed us");

    let (out_tx, mut out_rx) = mpsc::channel::<Request>(64);
    *shared.out_tx.lock() = Some(out_tx.clone());

    let writer = tokio::spawn(async move {
        while let Some(req) = out_rx.recv().await {
            let Ok(text) = serde_json::to_string(&req) else { continue };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    resubscribe_all(shared, &out_tx).await;

    // The orchestrator pushes `ping` notifications as its keep-alive; this
    // side only needs to notice if the socket goes quiet for too long.
    let idle_timeout = ping_interval * 3;
    loop {
        match tokio::time::timeout(idle_timeout, stream.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => handle_inbound(&text, shared),
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                tracing::info!("orchestrator closed connection");
                break;
            }
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(e))) => {
                writer.abort();
                return Err(ClientError::WebSocket(e.to_string()));
            }
            Err(_) => {
                writer.abort();
                return Err(ClientError::WebSocket("no activity within idle timeout".into()));
            }
        }
    }

    writer.abort();
    Ok(())
}

async fn resubscribe_all(shared: &Arc<Shared>, out_tx: &mpsc::Sender<Request>) {
    let snapshot: Vec<(String, bool, Option<i64>)> = shared
        .subs
        .lock()
        .iter()
        .map(|(conversation, s)| (conversation.clone(), s.include_guidance, s.last_seq))
        .collect();
    for (conversation_id, include_guidance, since_seq) in snapshot {
        let id = shared.next_id.fetch_add(1, Ordering::SeqCst);
        let params = methods::SubscribeParams { conversation_id, include_guidance, since_seq };
        let Ok(params) = serde_json::to_value(params) else { continue };
        let req = Request::new(Value::from(id), name::SUBSCRIBE, Some(params));
        // Best-effort: resubscribing is advisory. A dropped resubscribe just
        // means the next event delivery re-triggers it via a fresh call.
        let _ = out_tx.send(req).await;
    }
}

fn handle_inbound(text: &str, shared: &Arc<Shared>) {
    let frame = match serde_json::from_str::<OutboundFrame>(text) {
        Ok(f) => f,
        Err(e) => {
            tracing::debug!(error = %e, "failed to parse inbound frame");
            return;
        }
    };
    match frame {
        OutboundFrame::Response(resp) => {
            let Some(id) = resp.id.as_i64() else { return };
            if let Some(tx) = shared.pending.lock().remove(&id) {
                let result = match (resp.result, resp.error) {
                    (Some(v), _) => Ok(v),
                    (None, Some(e)) => Err(e),
                    (None, None) => Ok(Value::Null),
                };
                let _ = tx.send(result);
            }
        }
        OutboundFrame::Notification(n) => match n.method.as_str() {
            m if m == name::EVENT => {
                let Some(params) = n.params else { return };
                let Ok(event) = serde_json::from_value::<methods::EventParams>(params) else { return };
                let mut subs = shared.subs.lock();
                if let Some(state) = subs.get_mut(&event.conversation) {
                    state.last_seq = Some(event.seq);
                    let _ = state.tx.try_send(StreamItem::Event(event));
                }
            }
            m if m == name::GUIDANCE => {
                let Some(params) = n.params else { return };
                let Ok(guidance) = serde_json::from_value::<methods::GuidanceParams>(params) else { return };
                let subs = shared.subs.lock();
                if let Some(state) = subs.get(&guidance.conversation) {
                    let _ = state.tx.try_send(StreamItem::Guidance(guidance));
                }
            }
            m if m == name::PING => {
                tracing::trace!("received keep-alive ping");
            }
            other => {
                tracing::debug!(method = other, "ignoring unknown notification");
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_policy_is_configurable() {
        let backoff = ReconnectBackoff { max_attempts: 3, ..Default::default() };
        assert!(!backoff.should_give_up(2));
        assert!(backoff.should_give_up(3));
    }
}
