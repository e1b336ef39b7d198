use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ws::Message, ws::WebSocket, State, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use tentickle_core::config::{HANDSHAKE_TIMEOUT_MS, HEARTBEAT_INTERVAL_SECS, MAX_PAYLOAD_BYTES};
use tentickle_core::types::SessionKey;
use tentickle_protocol::frames::{EventFrame, InboundFrame, ResFrame};
use tentickle_protocol::handshake::ConnectParams;
use tentickle_protocol::methods::{CONNECT, SESSION_SUBSCRIBE};
use tracing::{info, warn};

use crate::gateway::Gateway;
use crate::ws::handshake;

/// WS connection state machine.
///
/// AwaitingConnect → Authenticated → (runs until close) → Closing
/// Handshake must complete within HANDSHAKE_TIMEOUT_MS or connection drops.
enum ConnState {
    AwaitingConnect { nonce: String },
    Authenticated,
    Closing,
}

/// Axum handler — upgrades HTTP to WebSocket at GET /ws.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(gateway): State<Arc<Gateway>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_connection(socket, gateway))
}

/// Per-connection task — lives for the entire WS session lifetime.
async fn handle_connection(socket: WebSocket, gateway: Arc<Gateway>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, "new WS connection");
    gateway.ws_client_connected(&conn_id);

    let (mut tx, mut rx) = socket.split();
    // Everything pushed to the client — subscribed events, heartbeats,
    // responses from subscribe-spawned forwarders — funnels through here so
    // the single `tx.send` loop below is the only writer to the socket.
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(256);

    let nonce = handshake::make_nonce();
    let challenge_json = handshake::challenge_event(&nonce);
    if tx.send(Message::Text(challenge_json.into())).await.is_err() {
        return;
    }

    let mut conn_state = ConnState::AwaitingConnect { nonce };

    let handshake_deadline =
        tokio::time::Instant::now() + Duration::from_millis(HANDSHAKE_TIMEOUT_MS);
    let mut handshake_timer = Box::pin(tokio::time::sleep_until(handshake_deadline));

    let mut tick_interval = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
    tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut sequence: u64 = 1;

    loop {
        tokio::select! {
            msg = rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let text_ref: &str = &text;
                        if text_ref.len() > MAX_PAYLOAD_BYTES {
                            warn!(conn_id, size = text_ref.len(), "payload too large, dropping");
                            break;
                        }
                        conn_state = process_message(
                            &conn_id, text_ref, conn_state, &out_tx, &gateway,
                        )
                        .await;
                        if matches!(conn_state, ConnState::Closing) {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }

            outbound = out_rx.recv() => {
                match outbound {
                    Some(message) => {
                        if tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            _ = tick_interval.tick() => {
                if matches!(conn_state, ConnState::Authenticated) {
                    let tick = EventFrame::new("tick", "", sequence, serde_json::json!({
                        "ts": chrono::Utc::now().timestamp_millis(),
                    }));
                    sequence += 1;
                    let json = serde_json::to_string(&tick).unwrap_or_default();
                    if tx.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
            }

            _ = &mut handshake_timer => {
                if matches!(conn_state, ConnState::AwaitingConnect { .. }) {
                    warn!(conn_id, "handshake timeout, closing connection");
                    break;
                }
            }
        }
    }

    gateway.ws_client_disconnected(&conn_id);
    info!(conn_id, "WS connection closed");
}

/// Handle a single inbound text frame. Returns the new connection state.
async fn process_message(
    conn_id: &str,
    text: &str,
    state: ConnState,
    out_tx: &mpsc::Sender<Message>,
    gateway: &Arc<Gateway>,
) -> ConnState {
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            warn!(conn_id, error = %e, "malformed frame, ignoring");
            return state;
        }
    };

    match state {
        // pre-auth: only `connect` is valid
        ConnState::AwaitingConnect { nonce: _ } => {
            let Some(req) = frame.as_req() else {
                return state;
            };

            if req.method != CONNECT {
                let res = ResFrame::err(&req.id, "PROTOCOL_ERROR", "must authenticate first");
                let _ = send_json(out_tx, &res).await;
                return state;
            }

            let params: ConnectParams = match req.params.and_then(|p| serde_json::from_value(p).ok()) {
                Some(p) => p,
                None => {
                    let res = ResFrame::err(&req.id, "PROTOCOL_ERROR", "invalid connect params");
                    let _ = send_json(out_tx, &res).await;
                    return ConnState::Closing;
                }
            };

            match gateway.verify_auth(&params) {
                Ok(()) => {
                    let hello = handshake::hello_ok_payload(conn_id);
                    let res = ResFrame::ok(&req.id, hello);
                    let _ = send_json(out_tx, &res).await;
                    info!(conn_id, "client authenticated");
                    ConnState::Authenticated
                }
                Err(reason) => {
                    warn!(conn_id, %reason, "auth failed");
                    let res = ResFrame::err(&req.id, "AUTH_FAILED", &reason);
                    let _ = send_json(out_tx, &res).await;
                    ConnState::Closing
                }
            }
        }

        // post-auth: dispatch request frames, special-casing subscribe so it
        // can spawn a standing forwarder instead of returning a single res.
        ConnState::Authenticated => {
            if let Some(req) = frame.as_req() {
                if req.method == SESSION_SUBSCRIBE {
                    spawn_subscription_forwarder(conn_id, &req, out_tx.clone(), gateway.clone()).await;
                } else {
                    let res = gateway.dispatch(&req).await;
                    let _ = send_json(out_tx, &res).await;
                }
            }
            ConnState::Authenticated
        }

        ConnState::Closing => ConnState::Closing,
    }
}

/// `session.subscribe` doesn't return a single response — it opens a
/// standing forwarder that pushes every matching `EventFrame` from the
/// session's event bus onto `out_tx` until the connection closes (spec §4.1
/// `subscribe`).
async fn spawn_subscription_forwarder(
    conn_id: &str,
    req: &tentickle_protocol::frames::ReqFrame,
    out_tx: mpsc::Sender<Message>,
    gateway: Arc<Gateway>,
) {
    let Some(session_id) = req.session_id.as_deref() else {
        let res = ResFrame::err(&req.id, "PROTOCOL_ERROR", "session.subscribe requires sessionId");
        let _ = send_json(&out_tx, &res).await;
        return;
    };
    let key = match SessionKey::parse(session_id) {
        Ok(k) => k,
        Err(e) => {
            let res = ResFrame::err(&req.id, "INVALID_SESSION_KEY", &e);
            let _ = send_json(&out_tx, &res).await;
            return;
        }
    };
    let filter = req
        .params
        .as_ref()
        .and_then(|p| p.get("events"))
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect::<Vec<_>>()
        });

    let mut rx = match gateway.subscribe(&key, filter).await {
        Ok(rx) => rx,
        Err(e) => {
            let res = ResFrame::err(&req.id, e.code(), &e.to_string());
            let _ = send_json(&out_tx, &res).await;
            return;
        }
    };

    let ack = ResFrame::ok(req.id.clone(), serde_json::json!({ "subscribed": true }));
    let _ = send_json(&out_tx, &ack).await;

    let conn_id = conn_id.to_string();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let json = serde_json::to_string(&event).unwrap_or_default();
            if out_tx.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        info!(conn_id, "subscription forwarder ended");
    });
}

/// Serialize and send a frame over the connection's outbound channel.
async fn send_json<T: serde::Serialize>(out_tx: &mpsc::Sender<Message>, payload: &T) -> Result<(), ()> {
    let json = serde_json::to_string(payload).unwrap_or_default();
    out_tx.send(Message::Text(json.into())).await.map_err(|_| ())
}
