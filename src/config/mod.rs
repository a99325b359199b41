//! Configuration loading.
//!
//! JSON config file resolved from `DESKGATE_CONFIG_PATH`, then
//! `DESKGATE_STATE_DIR/deskgate.json`, then `~/.deskgate/deskgate.json`.
//! A missing file yields defaults; secrets can be overridden from the
//! environment (`DESKGATE_TOKEN_SECRET`).

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {message}")]
    ReadError { path: String, message: String },

    #[error("failed to parse config file {path}: {message}")]
    ParseError { path: String, message: String },
}

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GatewayConfig {
    /// HTTP/WS bind address.
    pub bind: SocketAddr,
    /// Shared secret for bearer-token signing. Overridable via
    /// `DESKGATE_TOKEN_SECRET`; generated per-process when absent.
    pub token_secret: Option<String>,
    /// Path to the account store file. Defaults to `<state dir>/accounts.json`.
    pub store_path: Option<PathBuf>,
    /// External scoring command (argv). Empty disables the endpoint.
    pub scoring_command: Vec<String>,
    /// Realtime handshake timeout in milliseconds.
    pub handshake_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            bind: SocketAddr::from(([127, 0, 0, 1], 8087)),
            token_secret: None,
            store_path: None,
            scoring_command: Vec::new(),
            handshake_timeout_ms: 10_000,
        }
    }
}

impl GatewayConfig {
    /// Token secret with env precedence. Generates an ephemeral secret (and
    /// warns) when none is configured: tokens then die with the process.
    pub fn effective_token_secret(&self) -> Vec<u8> {
        if let Ok(secret) = env::var("DESKGATE_TOKEN_SECRET") {
            if !secret.is_empty() {
                return secret.into_bytes();
            }
        }
        if let Some(secret) = &self.token_secret {
            if !secret.is_empty() {
                return secret.clone().into_bytes();
            }
        }
        warn!("no token secret configured; generating ephemeral secret for this process");
        match crate::crypto::generate_hex_secret(32) {
            Ok(secret) => secret.into_bytes(),
            Err(e) => {
                // getrandom failing means the platform RNG is broken; there
                // is no safe fallback for key material.
                panic!("failed to generate ephemeral token secret: {e}");
            }
        }
    }

    /// Account store path with the state-dir default applied.
    pub fn effective_store_path(&self) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(|| resolve_state_dir().join("accounts.json"))
    }
}

/// Resolve the state directory.
/// Priority: `DESKGATE_STATE_DIR` > `~/.deskgate`.
pub fn resolve_state_dir() -> PathBuf {
    if let Ok(dir) = env::var("DESKGATE_STATE_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".deskgate")
}

/// Resolve the config file path.
/// Priority: `DESKGATE_CONFIG_PATH` > `<state dir>/deskgate.json`.
pub fn get_config_path() -> PathBuf {
    if let Ok(path) = env::var("DESKGATE_CONFIG_PATH") {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }
    resolve_state_dir().join("deskgate.json")
}

/// Load the config, falling back to defaults when the file is absent.
pub fn load_config() -> Result<GatewayConfig, ConfigError> {
    let path = get_config_path();
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(GatewayConfig::default());
        }
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.display().to_string(),
                message: e.to_string(),
            })
        }
    };
    serde_json::from_str(&raw).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}
