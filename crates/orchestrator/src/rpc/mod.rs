//! The duplex RPC server: one axum WebSocket connection per client, framed
//! as JSON-RPC 2.0. A connection may subscribe to any number of
//! conversations; each subscription's deliveries are multiplexed onto the
//! same socket as `event`/`guidance` notifications by a dedicated writer
//! task fed through an `mpsc` channel, mirroring how a single connection's
//! inbound reader and outbound writer are split elsewhere in this stack.

mod dispatch;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use orc_protocol::methods::{name, WelcomeParams};
use orc_protocol::{InboundFrame, Notification, OutboundFrame};
use tokio::sync::mpsc;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new().route("/rpc", get(ws_upgrade)).with_state(state)
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<OutboundFrame>(256);

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let Ok(text) = serde_json::to_string(&frame) else { continue };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let welcome = Notification::new(name::WELCOME, serde_json::to_value(WelcomeParams { ok: true }).unwrap());
    if out_tx.send(OutboundFrame::Notification(welcome)).await.is_err() {
        writer.abort();
        return;
    }

    let mut conn = dispatch::Connection::new(state, out_tx.clone());

    while let Some(msg) = stream.next().await {
        let Ok(msg) = msg else { break };
        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => break,
            _ => continue,
        };
        match orc_protocol::parse_inbound(&text) {
            Ok(InboundFrame::Request(req)) => conn.handle_request(req).await,
            Ok(InboundFrame::Notification(_)) => {}
            Err(e) => {
                tracing::warn!(error = %e, "dropping unparseable inbound frame");
            }
        }
    }

    conn.teardown();
    writer.abort();
}
