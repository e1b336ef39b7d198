//! Unix domain socket transport (spec §4.2: one of the three gateway
//! transports). Frames are newline-delimited JSON, same `ReqFrame`/
//! `ResFrame`/`EventFrame` shapes as the WebSocket transport, dispatched
//! through the same [`Gateway::dispatch`].

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tentickle_core::types::SessionKey;
use tentickle_protocol::frames::{InboundFrame, ResFrame};
use tentickle_protocol::methods::SESSION_SUBSCRIBE;

use crate::gateway::Gateway;

/// Accept connections on `listener` until `cancel` fires.
pub async fn serve(listener: UnixListener, gateway: Arc<Gateway>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("unix socket transport stopping");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let gateway = gateway.clone();
                        let conn_cancel = cancel.clone();
                        tokio::spawn(async move {
                            handle_conn(stream, gateway, conn_cancel).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "unix socket accept failed");
                    }
                }
            }
        }
    }
}

async fn handle_conn(stream: UnixStream, gateway: Arc<Gateway>, cancel: CancellationToken) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(256);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => {
                match line {
                    Ok(Some(text)) => {
                        if text.trim().is_empty() {
                            continue;
                        }
                        handle_line(&text, &gateway, out_tx.clone()).await;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "unix socket read error");
                        break;
                    }
                }
            }
            outbound = out_rx.recv() => {
                match outbound {
                    Some(line) => {
                        if write_half.write_all(line.as_bytes()).await.is_err()
                            || write_half.write_all(b"\n").await.is_err()
                        {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }
}

async fn handle_line(text: &str, gateway: &Arc<Gateway>, out_tx: mpsc::Sender<String>) {
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, "malformed unix socket frame, ignoring");
            return;
        }
    };
    let Some(req) = frame.as_req() else { return };

    if req.method == SESSION_SUBSCRIBE {
        let Some(session_id) = req.session_id.clone() else {
            let res = ResFrame::err(&req.id, "PROTOCOL_ERROR", "session.subscribe requires sessionId");
            send(&out_tx, &res).await;
            return;
        };
        let key = match SessionKey::parse(&session_id) {
            Ok(k) => k,
            Err(e) => {
                send(&out_tx, &ResFrame::err(&req.id, "INVALID_SESSION_KEY", &e)).await;
                return;
            }
        };
        let filter = req
            .params
            .as_ref()
            .and_then(|p| p.get("events"))
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect::<Vec<_>>());

        match gateway.subscribe(&key, filter).await {
            Ok(mut rx) => {
                send(&out_tx, &ResFrame::ok(req.id.clone(), serde_json::json!({ "subscribed": true }))).await;
                tokio::spawn(async move {
                    while let Some(event) = rx.recv().await {
                        let json = serde_json::to_string(&event).unwrap_or_default();
                        if out_tx.send(json).await.is_err() {
                            break;
                        }
                    }
                });
            }
            Err(e) => {
                send(&out_tx, &ResFrame::err(&req.id, e.code(), &e.to_string())).await;
            }
        }
        return;
    }

    let res = gateway.dispatch(&req).await;
    send(&out_tx, &res).await;
}

async fn send(out_tx: &mpsc::Sender<String>, res: &ResFrame) {
    let json = serde_json::to_string(res).unwrap_or_default();
    let _ = out_tx.send(json).await;
}
