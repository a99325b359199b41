//! Client session state machine.
//!
//! One [`Session`] per logged-in console. Termination is idempotent: the
//! first cause to arrive wins, every later trigger (watchdog result,
//! realtime event, sibling logout, user action) becomes a no-op. All
//! background tasks hang off one cancellation token, so a terminated
//! session tears down its watchdogs, realtime listener, and tabsync
//! subscriber in one step.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::api::{ApiClient, ApiError};
use crate::client::tabsync::TabSync;
use crate::client::{watchdog, ws};

/// Default interval for the primary session watchdog.
pub const SESSION_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default interval for the slower per-view watchdog.
pub const VIEW_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Client-observed lifecycle phase.
///
/// [`Session::authenticate`] drives the `Anonymous → Authenticating →
/// Authenticated` leg, publishing each transition so a front end can render
/// the in-flight state; a [`Session`] is constructed at the moment of the
/// `Authenticated` transition. Termination passes through `Terminating`
/// while cleanup runs and lands back on `Anonymous`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Anonymous,
    Authenticating,
    Authenticated,
    Terminating,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The user logged out locally. The token is NOT invalidated server-side;
    /// it simply stops being used.
    UserLogout,
    /// The account's active flag was cleared by an administrator.
    Deactivated,
    /// The account was deleted by an administrator.
    Deleted,
    /// The gateway rejected the token itself (expired or tampered).
    Rejected,
    /// A sibling session on the same machine logged out and signalled us.
    SiblingLogout,
    /// The realtime channel dropped unexpectedly. Disconnect is session end,
    /// not a transient fault; no reconnection is attempted.
    ChannelLost,
}

impl SessionEnd {
    /// User-facing explanation for the termination.
    pub fn message(&self) -> &'static str {
        match self {
            SessionEnd::UserLogout => "You have been logged out.",
            SessionEnd::Deactivated => {
                "Your account has been deactivated by the administrator."
            }
            SessionEnd::Deleted => "Your account has been deleted by the administrator.",
            SessionEnd::Rejected => "Your session is no longer valid. Please log in again.",
            SessionEnd::SiblingLogout => "You have been logged out in another window.",
            SessionEnd::ChannelLost => "Connection to the server was lost.",
        }
    }
}

/// A live client session.
pub struct Session {
    api: ApiClient,
    account_id: String,
    phase: Mutex<SessionPhase>,
    end_tx: watch::Sender<Option<SessionEnd>>,
    cancel: CancellationToken,
    tabsync: Option<TabSync>,
}

impl Session {
    /// Wrap an authenticated client in a session for the given account.
    /// This is the `Authenticated` transition.
    pub fn new(api: ApiClient, account_id: String) -> Arc<Self> {
        let (end_tx, _) = watch::channel(None);
        Arc::new(Session {
            api,
            account_id,
            phase: Mutex::new(SessionPhase::Authenticated),
            end_tx,
            cancel: CancellationToken::new(),
            tabsync: None,
        })
    }

    /// Run the full login leg, publishing each phase transition to
    /// `phase_tx`. A failed login lands back on `Anonymous` and returns the
    /// login error.
    pub async fn authenticate(
        base_url: &str,
        identifier: &str,
        secret: &str,
        phase_tx: &watch::Sender<SessionPhase>,
    ) -> Result<Arc<Self>, ApiError> {
        let _ = phase_tx.send(SessionPhase::Authenticating);
        match ApiClient::login(base_url, identifier, secret).await {
            Ok((api, account)) => {
                let _ = phase_tx.send(SessionPhase::Authenticated);
                Ok(Session::new(api, account.id))
            }
            Err(e) => {
                let _ = phase_tx.send(SessionPhase::Anonymous);
                Err(e)
            }
        }
    }

    /// As [`Session::new`], with sibling-logout signalling over the given
    /// marker file.
    pub fn with_tabsync(api: ApiClient, account_id: String, tabsync: TabSync) -> Arc<Self> {
        let (end_tx, _) = watch::channel(None);
        Arc::new(Session {
            api,
            account_id,
            phase: Mutex::new(SessionPhase::Authenticated),
            end_tx,
            cancel: CancellationToken::new(),
            tabsync: Some(tabsync),
        })
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.lock()
    }

    pub fn is_live(&self) -> bool {
        self.phase() == SessionPhase::Authenticated
    }

    /// Subscribe to the termination notice. Receivers see `None` while the
    /// session is live and the end cause once it terminates.
    pub fn subscribe_end(&self) -> watch::Receiver<Option<SessionEnd>> {
        self.end_tx.subscribe()
    }

    /// Resolves when the session terminates.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Child token for background tasks tied to this session's lifetime.
    pub fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Terminate the session with the given cause.
    ///
    /// Idempotent: returns `true` only for the call that actually performed
    /// the transition. A sibling-initiated termination is not re-published
    /// over tabsync, otherwise two windows would signal each other forever.
    pub fn terminate(&self, cause: SessionEnd) -> bool {
        {
            let mut phase = self.phase.lock();
            if *phase != SessionPhase::Authenticated {
                debug!(?cause, "termination ignored, session already ended");
                return false;
            }
            *phase = SessionPhase::Terminating;
        }

        info!(account_id = %self.account_id, ?cause, "session terminated");
        let _ = self.end_tx.send(Some(cause));
        self.cancel.cancel();

        if cause != SessionEnd::SiblingLogout {
            if let Some(tabsync) = &self.tabsync {
                tabsync.publish();
            }
        }

        *self.phase.lock() = SessionPhase::Anonymous;
        true
    }

    /// Local logout. The bearer token remains structurally valid until it
    /// expires; the gateway is not told anything.
    pub fn logout(&self) -> bool {
        self.terminate(SessionEnd::UserLogout)
    }

    /// Spawn the primary watchdog at the default 5s interval.
    pub fn spawn_watchdog(self: &Arc<Self>) {
        self.spawn_watchdog_with_interval(SESSION_POLL_INTERVAL);
    }

    pub fn spawn_watchdog_with_interval(self: &Arc<Self>, interval: Duration) {
        tokio::spawn(watchdog::run_watchdog(self.clone(), interval));
    }

    /// Spawn the slower secondary watchdog used while a long-lived view is
    /// open. Same polling loop as the primary, on its own cadence.
    pub fn spawn_view_watchdog(self: &Arc<Self>) {
        self.spawn_watchdog_with_interval(VIEW_POLL_INTERVAL);
    }

    /// Spawn the realtime listener for addressed deauthorization events.
    pub fn spawn_realtime(self: &Arc<Self>, ws_url: String) {
        tokio::spawn(ws::run_realtime(self.clone(), ws_url));
    }

    /// Spawn the tabsync subscriber, if this session carries a marker file.
    pub fn spawn_tabsync_listener(self: &Arc<Self>) {
        if let Some(tabsync) = &self.tabsync {
            tokio::spawn(tabsync.clone().listen(self.clone()));
        }
    }
}
