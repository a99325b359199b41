//! Deauthorization broadcaster.
//!
//! Invoked synchronously from the admin deactivate/delete handlers (and, for
//! the addressed push only, from the request gate). Delivery is at-most-once
//! and best-effort: no retry queue, no durability. A client with no open
//! channel is caught by its next watchdog poll instead.

use serde_json::json;
use tracing::debug;

use crate::registry::ConnectionRegistry;

/// Why a client is being deauthorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeauthReason {
    Deactivated,
    Deleted,
}

impl DeauthReason {
    /// User-facing notice for this reason.
    pub fn message(self) -> &'static str {
        match self {
            DeauthReason::Deactivated => "Your account has been deactivated by the administrator.",
            DeauthReason::Deleted => "Your account has been deleted by the administrator.",
        }
    }
}

/// Name of the addressed termination event for an account.
pub fn deauth_event_name(account_id: &str) -> String {
    format!("force_logout_{account_id}")
}

/// Push an addressed deauthorization event to the account's registered
/// channel, if any. Silently dropped when none is registered.
pub fn push_deauth(registry: &ConnectionRegistry, account_id: &str, reason: DeauthReason) -> bool {
    let Some(handle) = registry.lookup(account_id) else {
        debug!(account_id, ?reason, "deauth event dropped: no registered channel");
        return false;
    };
    let delivered = handle.send_event(
        &deauth_event_name(account_id),
        json!({ "reason": reason, "message": reason.message() }),
    );
    if !delivered {
        debug!(account_id, ?reason, "deauth event dropped: channel gone");
    }
    delivered
}

/// Full revocation broadcast: addressed event, then a sweep force-closing
/// every open channel recorded for the account.
///
/// The sweep covers channels that are open but not currently registered for
/// the account (for example, displaced by a later join), which the addressed
/// event alone would miss.
pub fn broadcast_deauth(registry: &ConnectionRegistry, account_id: &str, reason: DeauthReason) {
    push_deauth(registry, account_id, reason);

    for channel in registry.open_channels() {
        if channel.account_id == account_id {
            debug!(
                account_id,
                conn_id = %channel.conn_id,
                ?reason,
                "force-closing channel during deauth sweep"
            );
            channel.force_close(1008, reason.message());
        }
    }
}
