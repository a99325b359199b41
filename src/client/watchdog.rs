//! Polling watchdog.
//!
//! One cancellable task per poll cadence, probing the authoritative status
//! endpoint and terminating the session on the first disqualifying answer.
//! Transport errors are treated as transient: the server being briefly
//! unreachable is not evidence the account was revoked.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::client::api::StatusProbe;
use crate::client::session::{Session, SessionEnd};

/// Poll the status endpoint at `interval` until the session ends or a probe
/// disqualifies it.
pub async fn run_watchdog(session: Arc<Session>, interval: Duration) {
    loop {
        tokio::select! {
            _ = session.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }

        let probe = session.api().check_status(session.account_id()).await;

        // The session may have terminated while the request was in flight;
        // a late response must not override the recorded cause.
        if !session.is_live() {
            return;
        }

        match probe {
            Ok(StatusProbe::Active) => {}
            Ok(StatusProbe::Inactive) => {
                session.terminate(SessionEnd::Deactivated);
                return;
            }
            Ok(StatusProbe::Deleted) => {
                session.terminate(SessionEnd::Deleted);
                return;
            }
            Ok(StatusProbe::Unauthorized) => {
                session.terminate(SessionEnd::Rejected);
                return;
            }
            Err(e) => {
                debug!(error = %e, "status probe failed, will retry");
            }
        }
    }
}
