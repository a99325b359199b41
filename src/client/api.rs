//! Typed HTTP client over the gateway REST surface.
//!
//! Only the endpoints the session machinery needs: login, profile, and the
//! authoritative status probe that backs the watchdogs.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::accounts::AccountView;

/// Errors from the HTTP client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network-level failure (connect, timeout, broken pipe). Watchdogs treat
    /// these as transient and keep polling.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("login rejected: {message}")]
    LoginRejected { status: u16, message: String },

    #[error("unexpected response status {0}")]
    UnexpectedStatus(u16),
}

/// Outcome of one authoritative status probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusProbe {
    /// Account exists and is active.
    Active,
    /// Account exists but the active flag is cleared.
    Inactive,
    /// Account no longer exists.
    Deleted,
    /// The token itself was rejected.
    Unauthorized,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
    account: AccountView,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// Authenticated handle to one gateway.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl ApiClient {
    /// Log in and return an authenticated client plus the account it belongs
    /// to.
    pub async fn login(
        base_url: &str,
        identifier: &str,
        secret: &str,
    ) -> Result<(Self, AccountView), ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        let resp = http
            .post(format!("{base_url}/auth/login"))
            .json(&json!({ "identifier": identifier, "secret": secret }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body: ErrorBody = resp.json().await.unwrap_or(ErrorBody {
                message: String::new(),
            });
            return Err(ApiError::LoginRejected {
                status: status.as_u16(),
                message: body.message,
            });
        }

        let body: LoginResponse = resp.json().await?;
        let client = ApiClient {
            http,
            base_url: base_url.to_string(),
            token: body.token,
        };
        Ok((client, body.account))
    }

    /// Build a client around an existing token (e.g. restored from disk).
    pub fn with_token(base_url: &str, token: &str) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(ApiClient {
            http,
            base_url: base_url.to_string(),
            token: token.to_string(),
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Fetch the caller's own profile through the request gate.
    pub async fn profile(&self) -> Result<AccountView, ApiError> {
        let resp = self
            .http
            .get(format!("{}/auth/profile", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ApiError::UnexpectedStatus(status.as_u16()));
        }
        Ok(resp.json().await?)
    }

    /// Probe authoritative account status.
    ///
    /// Maps the gateway's responses onto [`StatusProbe`]: the request gate
    /// itself answers 403 for a deactivated caller and 404 for a deleted one
    /// before the handler runs, so those arrive as statuses rather than
    /// bodies.
    pub async fn check_status(&self, account_id: &str) -> Result<StatusProbe, ApiError> {
        #[derive(Deserialize)]
        struct StatusBody {
            active: bool,
        }

        let resp = self
            .http
            .get(format!("{}/accounts/{account_id}/status", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await?;

        match resp.status().as_u16() {
            200 => {
                let body: StatusBody = resp.json().await?;
                Ok(if body.active {
                    StatusProbe::Active
                } else {
                    StatusProbe::Inactive
                })
            }
            401 => Ok(StatusProbe::Unauthorized),
            403 => Ok(StatusProbe::Inactive),
            404 => Ok(StatusProbe::Deleted),
            other => Err(ApiError::UnexpectedStatus(other)),
        }
    }
}
