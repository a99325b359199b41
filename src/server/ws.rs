//! WebSocket server implementation
//!
//! Realtime channel protocol:
//! 1. Client connects to `/ws` and must send `{"type":"auth","token":...}`
//!    as its first frame within the handshake timeout.
//! 2. The server verifies the token and re-checks live account state, then
//!    replies `{"type":"auth-ok","connId":...}`.
//! 3. The client may send `{"type":"join","account_id":...}` to register as
//!    the addressable channel for its own account.
//!
//! Any handshake defect closes the socket with policy code 1008 and a
//! deliberately uninformative reason. Unknown frame types after auth are
//! ignored.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::registry::{ChannelCommand, ChannelHandle};
use crate::server::GatewayState;
use crate::token;

/// Maximum accepted frame size. Anything larger is a protocol violation.
const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// Policy-violation close code used for every handshake or protocol failure.
const CLOSE_POLICY: u16 = 1008;

pub async fn ws_handler(
    State(state): State<Arc<GatewayState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.max_message_size(MAX_PAYLOAD_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>) {
    let (mut sink, mut stream) = socket.split();

    // Handshake: first frame must authenticate within the timeout.
    let account_id = match tokio::time::timeout(
        state.handshake_timeout,
        read_auth_frame(&mut stream, &state),
    )
    .await
    {
        Ok(Some(account_id)) => account_id,
        Ok(None) => {
            close_policy(&mut sink).await;
            return;
        }
        Err(_) => {
            debug!("realtime handshake timed out");
            close_policy(&mut sink).await;
            return;
        }
    };

    let conn_id = Uuid::new_v4().to_string();
    let (tx, mut rx) = mpsc::unbounded_channel::<ChannelCommand>();
    let cancel = CancellationToken::new();
    let handle = ChannelHandle::new(conn_id.clone(), account_id.clone(), tx, cancel.clone());
    state.registry.track(handle.clone());

    let ok = json!({ "type": "auth-ok", "conn_id": conn_id });
    if sink.send(Message::Text(ok.to_string())).await.is_err() {
        state.registry.untrack(&conn_id);
        return;
    }
    info!(conn_id = %conn_id, account_id = %account_id, "realtime channel authenticated");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // Force-closed by the broadcaster; the close frame (if any)
                // was already queued ahead of the cancel.
                drain_pending_close(&mut sink, &mut rx).await;
                break;
            }
            cmd = rx.recv() => {
                match cmd {
                    Some(ChannelCommand::Event { event, payload }) => {
                        let frame = json!({
                            "type": "event",
                            "event": event,
                            "payload": payload,
                        });
                        if sink.send(Message::Text(frame.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Some(ChannelCommand::Close { code, reason }) => {
                        let _ = sink
                            .send(Message::Close(Some(CloseFrame {
                                code,
                                reason: reason.into(),
                            })))
                            .await;
                        break;
                    }
                    None => break,
                }
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if !handle_client_frame(&text, &handle, &state) {
                            let _ = sink
                                .send(Message::Close(Some(CloseFrame {
                                    code: CLOSE_POLICY,
                                    reason: "protocol violation".into(),
                                })))
                                .await;
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Binary(_))) => {
                        debug!(conn_id = %conn_id, "ignoring binary frame");
                    }
                    Some(Err(e)) => {
                        // Covers oversized frames rejected by the message
                        // size cap; the close is best-effort on a socket
                        // that may already be gone.
                        debug!(conn_id = %conn_id, error = %e, "realtime receive error");
                        let _ = sink
                            .send(Message::Close(Some(CloseFrame {
                                code: CLOSE_POLICY,
                                reason: "protocol violation".into(),
                            })))
                            .await;
                        break;
                    }
                }
            }
        }
    }

    state.registry.leave(&handle);
    state.registry.untrack(&conn_id);
    info!(conn_id = %conn_id, account_id = %account_id, "realtime channel closed");
}

/// Read frames until the auth frame arrives. Returns the authenticated
/// account id, or `None` on any defect (non-auth first frame, bad token,
/// missing or inactive account).
async fn read_auth_frame(
    stream: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    state: &GatewayState,
) -> Option<String> {
    let text = loop {
        match stream.next().await? {
            Ok(Message::Text(text)) => break text,
            Ok(Message::Ping(_) | Message::Pong(_)) => continue,
            Ok(_) => return None,
            Err(e) => {
                debug!(error = %e, "realtime receive error during handshake");
                return None;
            }
        }
    };

    let frame: Value = serde_json::from_str(&text).ok()?;
    if frame.get("type").and_then(Value::as_str) != Some("auth") {
        debug!("first realtime frame was not auth");
        return None;
    }
    let raw = frame.get("token").and_then(Value::as_str)?;

    let claims = match token::verify(raw, &state.token_secret, Utc::now()) {
        Ok(claims) => claims,
        Err(e) => {
            debug!(error = %e, "realtime token verification failed");
            return None;
        }
    };

    // Same liveness rule as the REST gate: token alone is not enough.
    let account = state.store.get(&claims.account_id)?;
    if !account.active {
        warn!(account_id = %account.id, "inactive account attempted realtime handshake");
        return None;
    }
    Some(account.id)
}

/// Handle a post-auth client frame. Only `join` is meaningful; unknown but
/// well-formed frame types are ignored. Returns `false` for a protocol
/// violation (non-JSON frame, join for a foreign account) that must close
/// the channel.
fn handle_client_frame(text: &str, handle: &ChannelHandle, state: &GatewayState) -> bool {
    let frame: Value = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(_) => {
            debug!(conn_id = %handle.conn_id, "closing channel on malformed frame");
            return false;
        }
    };
    match frame.get("type").and_then(Value::as_str) {
        Some("join") => {
            let requested = frame.get("account_id").and_then(Value::as_str).unwrap_or("");
            // A channel may only register as its own account.
            if requested != handle.account_id {
                warn!(
                    conn_id = %handle.conn_id,
                    account_id = %handle.account_id,
                    requested = %requested,
                    "join rejected for mismatched account"
                );
                return false;
            }
            state.registry.join(handle.clone());
            debug!(conn_id = %handle.conn_id, account_id = %handle.account_id, "channel joined");
            true
        }
        other => {
            debug!(conn_id = %handle.conn_id, frame_type = ?other, "ignoring frame");
            true
        }
    }
}

/// After a cancel, flush the queued commands in order: any event frames
/// queued ahead of the close (the addressed deauthorization event in
/// particular) must still reach the client before the close frame. The
/// cancel and the queued close race into the select, so the cancel branch
/// may win with both commands still pending.
async fn drain_pending_close(
    sink: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    rx: &mut mpsc::UnboundedReceiver<ChannelCommand>,
) {
    while let Ok(cmd) = rx.try_recv() {
        match cmd {
            ChannelCommand::Event { event, payload } => {
                let frame = json!({
                    "type": "event",
                    "event": event,
                    "payload": payload,
                });
                if sink.send(Message::Text(frame.to_string())).await.is_err() {
                    return;
                }
            }
            ChannelCommand::Close { code, reason } => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })))
                    .await;
                return;
            }
        }
    }
    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_POLICY,
            reason: "deauthorized".into(),
        })))
        .await;
}

async fn close_policy(sink: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin)) {
    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_POLICY,
            reason: "authentication failed".into(),
        })))
        .await;
}
