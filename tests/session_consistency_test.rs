//! End-to-end tests for session revocation.
//!
//! Bearer tokens stay structurally valid for their full TTL, so every one of
//! these scenarios is about the machinery that revokes access anyway: the
//! request gate, the realtime deauthorization broadcast, the polling
//! watchdogs, and sibling-session logout signalling.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use tokio::sync::watch;

use deskgate::accounts::{Account, Role};
use deskgate::client::session::{Session, SessionEnd, SessionPhase};
use deskgate::client::tabsync::TabSync;
use deskgate::client::ApiClient;
use deskgate::server::broadcast::{broadcast_deauth, DeauthReason};
use deskgate::server::startup::{run_server_with_config, ServerConfig, ServerHandle};
use deskgate::server::GatewayState;
use deskgate::store::{secret, AccountStore};
use deskgate::token;

const ADMIN_SECRET: &str = "admin-pass";
const AGENT_SECRET: &str = "agent-pass";

fn seeded_account(identifier: &str, plain: &str, role: Role) -> Account {
    Account {
        id: Uuid::new_v4().to_string(),
        identifier: identifier.to_string(),
        secret_hash: secret::hash_secret_with_cost(plain, 2).unwrap(),
        role,
        display_name: identifier.to_string(),
        department: None,
        active: true,
        last_login_at: None,
        created_at: Utc::now(),
    }
}

async fn start_seeded_server() -> (ServerHandle, Arc<GatewayState>) {
    let store = Arc::new(AccountStore::in_memory());
    store
        .insert(seeded_account("admin@example.com", ADMIN_SECRET, Role::Admin))
        .unwrap();
    store
        .insert(seeded_account("agent@example.com", AGENT_SECRET, Role::Agent))
        .unwrap();

    let state = Arc::new(GatewayState::new(store, b"consistency-secret".to_vec()));
    let handle = run_server_with_config(ServerConfig::for_testing(state.clone()))
        .await
        .unwrap();
    (handle, state)
}

async fn login(base_url: &str, identifier: &str, secret: &str) -> (ApiClient, String) {
    let (client, account) = ApiClient::login(base_url, identifier, secret)
        .await
        .unwrap();
    (client, account.id)
}

/// Open a realtime channel, authenticate, and join as the given account.
async fn open_channel(
    ws_url: &str,
    token: &str,
    account_id: &str,
) -> tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
> {
    let (mut stream, _) = connect_async(ws_url).await.unwrap();
    stream
        .send(Message::Text(
            json!({ "type": "auth", "token": token }).to_string(),
        ))
        .await
        .unwrap();

    let reply = stream.next().await.unwrap().unwrap();
    let reply: Value = serde_json::from_str(reply.to_text().unwrap()).unwrap();
    assert_eq!(reply["type"], "auth-ok");
    assert!(reply["conn_id"].is_string());

    stream
        .send(Message::Text(
            json!({ "type": "join", "account_id": account_id }).to_string(),
        ))
        .await
        .unwrap();
    // The join has no acknowledgement; give the server a beat to process it.
    tokio::time::sleep(Duration::from_millis(100)).await;
    stream
}

async fn admin_client(handle: &ServerHandle) -> (reqwest::Client, String) {
    let (api, _) = login(&handle.base_url(), "admin@example.com", ADMIN_SECRET).await;
    (reqwest::Client::new(), api.token().to_string())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_deactivation_pushes_addressed_event_and_closes_channel() {
    let (handle, _state) = start_seeded_server().await;
    let (agent_api, agent_id) =
        login(&handle.base_url(), "agent@example.com", AGENT_SECRET).await;
    let mut channel = open_channel(&handle.ws_url(), agent_api.token(), &agent_id).await;

    let (http, admin_token) = admin_client(&handle).await;
    let resp = http
        .patch(format!("{}/accounts/{agent_id}/status", handle.base_url()))
        .bearer_auth(&admin_token)
        .json(&json!({ "active": false }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Addressed event first, then the sweep closes the channel.
    let mut saw_event = false;
    let mut saw_close = false;
    while let Ok(Some(msg)) =
        tokio::time::timeout(Duration::from_secs(3), channel.next()).await
    {
        match msg {
            Ok(Message::Text(text)) => {
                let frame: Value = serde_json::from_str(&text).unwrap();
                assert_eq!(frame["type"], "event");
                assert_eq!(frame["event"], format!("force_logout_{agent_id}"));
                assert_eq!(frame["payload"]["reason"], "deactivated");
                saw_event = true;
            }
            Ok(Message::Close(frame)) => {
                let frame = frame.expect("close frame should carry a code");
                assert_eq!(u16::from(frame.code), 1008);
                saw_close = true;
                break;
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }
    assert!(saw_event, "expected the addressed deauthorization event");
    assert!(saw_close, "expected the sweep to close the channel");

    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_addressed_event_always_precedes_sweep_close() {
    // The broadcaster queues the addressed event, then the close, then
    // cancels the connection task. The cancel races the queued commands into
    // the connection's select loop, so run the scenario repeatedly: the
    // client must see the event frame before the close every single time.
    let (handle, state) = start_seeded_server().await;

    for round in 0..10 {
        let account = seeded_account(
            &format!("agent{round}@example.com"),
            AGENT_SECRET,
            Role::Agent,
        );
        let agent_id = account.id.clone();
        state.store.insert(account).unwrap();
        let tok = token::issue(&agent_id, Role::Agent, Utc::now(), b"consistency-secret");
        let mut channel = open_channel(&handle.ws_url(), &tok, &agent_id).await;

        state.store.set_active(&agent_id, false).unwrap();
        broadcast_deauth(&state.registry, &agent_id, DeauthReason::Deactivated);

        let msg = tokio::time::timeout(Duration::from_secs(3), channel.next())
            .await
            .expect("round should deliver a frame")
            .unwrap()
            .unwrap();
        match msg {
            Message::Text(text) => {
                let frame: Value = serde_json::from_str(&text).unwrap();
                assert_eq!(frame["event"], format!("force_logout_{agent_id}"));
                assert_eq!(frame["payload"]["reason"], "deactivated");
            }
            other => panic!("round {round}: expected the event before the close, got {other:?}"),
        }

        let msg = tokio::time::timeout(Duration::from_secs(3), channel.next())
            .await
            .expect("round should deliver the close")
            .unwrap()
            .unwrap();
        match msg {
            Message::Close(frame) => {
                let frame = frame.expect("close frame should carry a code");
                assert_eq!(u16::from(frame.code), 1008);
            }
            other => panic!("round {round}: expected the close frame, got {other:?}"),
        }
    }

    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_deletion_closes_channel_with_deleted_reason() {
    let (handle, _state) = start_seeded_server().await;
    let (agent_api, agent_id) =
        login(&handle.base_url(), "agent@example.com", AGENT_SECRET).await;
    let mut channel = open_channel(&handle.ws_url(), agent_api.token(), &agent_id).await;

    let (http, admin_token) = admin_client(&handle).await;
    let resp = http
        .delete(format!("{}/accounts/{agent_id}", handle.base_url()))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let mut reason = None;
    while let Ok(Some(msg)) =
        tokio::time::timeout(Duration::from_secs(3), channel.next()).await
    {
        match msg {
            Ok(Message::Text(text)) => {
                let frame: Value = serde_json::from_str(&text).unwrap();
                reason = frame["payload"]["reason"].as_str().map(str::to_string);
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
    assert_eq!(reason.as_deref(), Some("deleted"));

    // The token survives but the gate now answers 404.
    let probe = agent_api.check_status(&agent_id).await.unwrap();
    assert_eq!(probe, deskgate::client::StatusProbe::Deleted);

    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watchdog_detects_deactivation_without_realtime() {
    let (handle, state) = start_seeded_server().await;
    let (agent_api, agent_id) =
        login(&handle.base_url(), "agent@example.com", AGENT_SECRET).await;

    // No realtime channel at all: the poll is the only detection path.
    let session = Session::new(agent_api, agent_id.clone());
    session.spawn_watchdog_with_interval(Duration::from_millis(100));
    let mut end_rx = session.subscribe_end();

    state.store.set_active(&agent_id, false).unwrap();

    tokio::time::timeout(Duration::from_secs(3), end_rx.changed())
        .await
        .expect("watchdog should notice the deactivation")
        .unwrap();
    assert_eq!(*end_rx.borrow(), Some(SessionEnd::Deactivated));

    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watchdog_detects_deletion() {
    let (handle, state) = start_seeded_server().await;
    let (agent_api, agent_id) =
        login(&handle.base_url(), "agent@example.com", AGENT_SECRET).await;

    let session = Session::new(agent_api, agent_id.clone());
    session.spawn_watchdog_with_interval(Duration::from_millis(100));
    let mut end_rx = session.subscribe_end();

    state.store.remove(&agent_id).unwrap();

    tokio::time::timeout(Duration::from_secs(3), end_rx.changed())
        .await
        .expect("watchdog should notice the deletion")
        .unwrap();
    assert_eq!(*end_rx.borrow(), Some(SessionEnd::Deleted));

    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watchdog_loops_funnel_into_one_termination() {
    let (handle, state) = start_seeded_server().await;

    let (phase_tx, _phase_rx) = watch::channel(SessionPhase::Anonymous);
    let session = Session::authenticate(
        &handle.base_url(),
        "agent@example.com",
        AGENT_SECRET,
        &phase_tx,
    )
    .await
    .unwrap();
    assert_eq!(*phase_tx.borrow(), SessionPhase::Authenticated);

    // Session loop and view loop, both shortened so each gets several ticks;
    // the default-cadence view watchdog rides along and is torn down with
    // the session.
    session.spawn_watchdog_with_interval(Duration::from_millis(100));
    session.spawn_watchdog_with_interval(Duration::from_millis(130));
    session.spawn_view_watchdog();
    let mut end_rx = session.subscribe_end();

    state.store.set_active(session.account_id(), false).unwrap();

    tokio::time::timeout(Duration::from_secs(3), end_rx.changed())
        .await
        .expect("a watchdog loop should notice the deactivation")
        .unwrap();
    assert_eq!(*end_rx.borrow(), Some(SessionEnd::Deactivated));

    // Later ticks from the other loops observe a dead session and are no-ops.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(*end_rx.borrow(), Some(SessionEnd::Deactivated));
    assert_eq!(session.phase(), SessionPhase::Anonymous);

    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_realtime_listener_terminates_session() {
    let (handle, _state) = start_seeded_server().await;
    let (agent_api, agent_id) =
        login(&handle.base_url(), "agent@example.com", AGENT_SECRET).await;

    let session = Session::new(agent_api, agent_id.clone());
    session.spawn_realtime(handle.ws_url());
    let mut end_rx = session.subscribe_end();
    // Let the listener authenticate and join before revoking.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let (http, admin_token) = admin_client(&handle).await;
    http.patch(format!("{}/accounts/{agent_id}/status", handle.base_url()))
        .bearer_auth(&admin_token)
        .json(&json!({ "active": false }))
        .send()
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(3), end_rx.changed())
        .await
        .expect("realtime listener should terminate the session")
        .unwrap();
    assert_eq!(*end_rx.borrow(), Some(SessionEnd::Deactivated));

    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_local_logout_does_not_invalidate_token() {
    let (handle, _state) = start_seeded_server().await;
    let (agent_api, agent_id) =
        login(&handle.base_url(), "agent@example.com", AGENT_SECRET).await;

    let session = Session::new(agent_api.clone(), agent_id.clone());
    assert!(session.logout());
    assert!(!session.is_live());

    // Revocation is emulated via account state, never via the token itself:
    // the gate still accepts the logged-out session's token.
    let probe = agent_api.check_status(&agent_id).await.unwrap();
    assert_eq!(probe, deskgate::client::StatusProbe::Active);

    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_logout_cause_not_overridden_by_late_watchdog() {
    let (handle, state) = start_seeded_server().await;
    let (agent_api, agent_id) =
        login(&handle.base_url(), "agent@example.com", AGENT_SECRET).await;

    let session = Session::new(agent_api, agent_id.clone());
    session.spawn_watchdog_with_interval(Duration::from_millis(50));

    session.logout();
    state.store.set_active(&agent_id, false).unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    // The first cause wins; the deactivation arrived after termination.
    assert_eq!(
        *session.subscribe_end().borrow(),
        Some(SessionEnd::UserLogout)
    );

    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sibling_logout_propagates_over_marker_file() {
    let (handle, _state) = start_seeded_server().await;
    let (api_a, agent_id) =
        login(&handle.base_url(), "agent@example.com", AGENT_SECRET).await;
    let api_b = api_a.clone();

    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("force-logout.marker");

    let session_a =
        Session::with_tabsync(api_a, agent_id.clone(), TabSync::new(marker.clone()));
    let session_b = Session::with_tabsync(api_b, agent_id, TabSync::new(marker));
    session_b.spawn_tabsync_listener();
    let mut end_rx = session_b.subscribe_end();
    // Give the filesystem watcher time to register.
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(session_a.logout());

    tokio::time::timeout(Duration::from_secs(3), end_rx.changed())
        .await
        .expect("sibling session should observe the logout marker")
        .unwrap();
    assert_eq!(*end_rx.borrow(), Some(SessionEnd::SiblingLogout));
    // The sibling's own termination was not republished, so session A keeps
    // its original cause.
    assert_eq!(
        *session_a.subscribe_end().borrow(),
        Some(SessionEnd::UserLogout)
    );

    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ws_rejects_bad_token() {
    let (handle, _state) = start_seeded_server().await;

    let (mut stream, _) = connect_async(handle.ws_url()).await.unwrap();
    stream
        .send(Message::Text(
            json!({ "type": "auth", "token": "forged.token" }).to_string(),
        ))
        .await
        .unwrap();

    let mut closed = false;
    while let Ok(Some(msg)) =
        tokio::time::timeout(Duration::from_secs(3), stream.next()).await
    {
        match msg {
            Ok(Message::Close(frame)) => {
                let frame = frame.expect("close frame should carry a code");
                assert_eq!(u16::from(frame.code), 1008);
                closed = true;
                break;
            }
            Ok(Message::Text(text)) => panic!("unexpected frame for bad token: {text}"),
            Ok(_) => {}
            Err(_) => break,
        }
    }
    assert!(closed, "expected a policy close for the bad token");

    handle.shutdown().await;
}
