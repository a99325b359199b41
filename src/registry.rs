//! Connection registry.
//!
//! Process-local map from account id to the most recent realtime channel for
//! that account, plus the set of every open authenticated channel. Injected
//! as a shared service into both the REST layer and the realtime layer so a
//! future externalized registry can slot in behind the same seam.
//!
//! `join` is upsert-overwrite: a new join for the same account silently
//! replaces the prior entry without closing the prior channel. The orphaned
//! channel stays in the open set, so broadcaster sweeps still reach it; only
//! addressed events miss it. Known limitation.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Outbound instruction for a channel's send pump.
#[derive(Debug, Clone)]
pub enum ChannelCommand {
    /// Deliver a named event frame to the client.
    Event { event: String, payload: Value },
    /// Send a close frame and stop the pump.
    Close { code: u16, reason: String },
}

/// Handle to one live realtime channel.
///
/// Cloneable; identity is the connection id.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    pub conn_id: String,
    pub account_id: String,
    sender: mpsc::UnboundedSender<ChannelCommand>,
    cancel: CancellationToken,
}

impl ChannelHandle {
    pub fn new(
        conn_id: String,
        account_id: String,
        sender: mpsc::UnboundedSender<ChannelCommand>,
        cancel: CancellationToken,
    ) -> Self {
        ChannelHandle {
            conn_id,
            account_id,
            sender,
            cancel,
        }
    }

    /// Queue an event frame. Returns `false` if the channel is already gone.
    pub fn send_event(&self, event: &str, payload: Value) -> bool {
        self.sender
            .send(ChannelCommand::Event {
                event: event.to_string(),
                payload,
            })
            .is_ok()
    }

    /// Force-close the channel: queue a close frame, then cancel the
    /// connection task so the receive loop stops even if the client never
    /// acknowledges the close.
    pub fn force_close(&self, code: u16, reason: &str) {
        let _ = self.sender.send(ChannelCommand::Close {
            code,
            reason: reason.to_string(),
        });
        self.cancel.cancel();
    }
}

/// Registry of realtime channels, keyed by account id, alongside the full
/// open-channel set used by broadcast sweeps.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    by_account: Mutex<HashMap<String, ChannelHandle>>,
    open: Mutex<HashMap<String, ChannelHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel as the current one for its account.
    /// Overwrites any prior entry for the same account without closing it.
    pub fn join(&self, handle: ChannelHandle) {
        let mut map = self.by_account.lock();
        if let Some(prior) = map.insert(handle.account_id.clone(), handle.clone()) {
            if prior.conn_id != handle.conn_id {
                debug!(
                    account_id = %handle.account_id,
                    prior_conn = %prior.conn_id,
                    new_conn = %handle.conn_id,
                    "registry join overwrote prior channel"
                );
            }
        }
    }

    /// Remove any registry entry pointing at this channel. Linear scan;
    /// acceptable at tens-to-hundreds of concurrent sessions.
    pub fn leave(&self, handle: &ChannelHandle) {
        self.by_account
            .lock()
            .retain(|_, h| h.conn_id != handle.conn_id);
    }

    /// Current channel for an account, if one is registered.
    pub fn lookup(&self, account_id: &str) -> Option<ChannelHandle> {
        self.by_account.lock().get(account_id).cloned()
    }

    /// Track an authenticated channel in the open set.
    pub fn track(&self, handle: ChannelHandle) {
        self.open.lock().insert(handle.conn_id.clone(), handle);
    }

    /// Drop a channel from the open set (on disconnect).
    pub fn untrack(&self, conn_id: &str) {
        self.open.lock().remove(conn_id);
    }

    /// Snapshot of every open authenticated channel.
    pub fn open_channels(&self) -> Vec<ChannelHandle> {
        self.open.lock().values().cloned().collect()
    }

    /// Number of registered account entries.
    pub fn registered_count(&self) -> usize {
        self.by_account.lock().len()
    }
}
