//! Server module
//!
//! HTTP and WebSocket servers sharing one gateway state.

pub mod broadcast;
pub mod http;
pub mod startup;
pub mod ws;

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::GatewayConfig;
use crate::registry::ConnectionRegistry;
use crate::scoring::Scorer;
use crate::store::AccountStore;

/// Shared state injected into both the REST layer and the realtime layer.
///
/// The registry lives here as an explicit service reference (not ambient
/// global state), leaving a seam for a future externalized implementation.
#[derive(Debug)]
pub struct GatewayState {
    pub store: Arc<AccountStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub token_secret: Vec<u8>,
    pub scorer: Option<Scorer>,
    pub handshake_timeout: Duration,
    pub start_time: Instant,
}

impl GatewayState {
    pub fn new(store: Arc<AccountStore>, token_secret: Vec<u8>) -> Self {
        GatewayState {
            store,
            registry: Arc::new(ConnectionRegistry::new()),
            token_secret,
            scorer: None,
            handshake_timeout: Duration::from_millis(10_000),
            start_time: Instant::now(),
        }
    }

    /// Build state from a loaded gateway config plus an opened store.
    pub fn from_config(config: &GatewayConfig, store: Arc<AccountStore>) -> Self {
        let mut state = GatewayState::new(store, config.effective_token_secret());
        state.scorer = Scorer::from_command(&config.scoring_command);
        state.handshake_timeout = Duration::from_millis(config.handshake_timeout_ms);
        state
    }

    /// Override the scorer, mainly for wiring a stand-in in tests.
    pub fn with_scorer(mut self, scorer: Option<Scorer>) -> Self {
        self.scorer = scorer;
        self
    }
}
