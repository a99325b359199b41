//! Realtime deauthorization listener.
//!
//! Connects to the gateway's `/ws` endpoint, authenticates, joins as the
//! session's account, and waits for the addressed deauthorization event.
//! An established channel that drops is treated as session end, not a
//! transient fault; no reconnection is attempted.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::client::session::{Session, SessionEnd};
use crate::server::broadcast::deauth_event_name;

/// Run the realtime listener until the session ends or the channel drops.
pub async fn run_realtime(session: Arc<Session>, ws_url: String) {
    let (stream, _) = match connect_async(&ws_url).await {
        Ok(ok) => ok,
        Err(e) => {
            // Never established; the polling watchdogs remain the detection
            // path for a session that could not open a channel.
            debug!(error = %e, "realtime connect failed");
            return;
        }
    };
    let (mut sink, mut stream) = stream.split();

    let auth = json!({ "type": "auth", "token": session.api().token() });
    if sink.send(Message::Text(auth.to_string())).await.is_err() {
        return;
    }
    let join = json!({ "type": "join", "account_id": session.account_id() });
    if sink.send(Message::Text(join.to_string())).await.is_err() {
        return;
    }

    let expected_event = deauth_event_name(session.account_id());

    loop {
        tokio::select! {
            _ = session.cancelled() => {
                // Close the channel explicitly on session end.
                let _ = sink.send(Message::Close(None)).await;
                return;
            }
            msg = stream.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "realtime channel closed by gateway");
                        session.terminate(SessionEnd::ChannelLost);
                        return;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!(error = %e, "realtime channel error, no reconnect");
                        session.terminate(SessionEnd::ChannelLost);
                        return;
                    }
                    None => {
                        session.terminate(SessionEnd::ChannelLost);
                        return;
                    }
                };

                let frame: Value = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(_) => continue,
                };
                if frame.get("type").and_then(Value::as_str) != Some("event") {
                    continue;
                }
                if frame.get("event").and_then(Value::as_str) != Some(expected_event.as_str()) {
                    continue;
                }

                let reason = frame
                    .pointer("/payload/reason")
                    .and_then(Value::as_str)
                    .unwrap_or("deactivated");
                let cause = match reason {
                    "deleted" => SessionEnd::Deleted,
                    "deactivated" => SessionEnd::Deactivated,
                    other => {
                        warn!(reason = %other, "unknown deauthorization reason");
                        SessionEnd::Deactivated
                    }
                };
                session.terminate(cause);
                return;
            }
        }
    }
}
