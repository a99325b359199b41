//! Authentication and authorization.
//!
//! Implements the credential issuer (login) and the request gate that runs
//! before every authorization-required REST handler. The gate re-checks live
//! account state on every call; a structurally valid 24h token must not grant
//! continued access after an out-of-band revocation.

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, warn};

use crate::accounts::{Account, Role};
use crate::registry::ConnectionRegistry;
use crate::server::broadcast::{push_deauth, DeauthReason};
use crate::store::{secret, AccountStore, StoreError};
use crate::token;

/// Authentication/authorization failure taxonomy.
///
/// Identity and token failures are reported uniformly (401, generic message)
/// so forgery attempts get no oracle distinguishing "expired" from
/// "tampered". Account-state failures are reported distinctly (403/404)
/// since that distinction is independently observable via the status-check
/// endpoint anyway.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid credentials")]
    AuthDenied,
    #[error("invalid authentication")]
    TokenInvalid,
    #[error("account is inactive")]
    AccountInactive,
    #[error("account not found")]
    AccountNotFound,
    #[error("access denied")]
    AccessDenied,
    #[error("realtime handshake rejected")]
    TransportAuthFailure,
    #[error("server error")]
    StorageUnavailable,
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::AuthDenied | AuthError::TokenInvalid | AuthError::TransportAuthFailure => {
                StatusCode::UNAUTHORIZED
            }
            AuthError::AccountInactive | AuthError::AccessDenied => StatusCode::FORBIDDEN,
            AuthError::AccountNotFound => StatusCode::NOT_FOUND,
            AuthError::StorageUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing message. Kept deliberately generic for identity/token
    /// failures.
    pub fn message(&self) -> &'static str {
        match self {
            AuthError::AuthDenied => "Invalid credentials",
            AuthError::TokenInvalid | AuthError::TransportAuthFailure => "Invalid authentication",
            AuthError::AccountInactive => "Account is inactive",
            AuthError::AccountNotFound => "Account not found",
            AuthError::AccessDenied => "Access denied",
            AuthError::StorageUnavailable => "Server error",
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => AuthError::AccountNotFound,
            StoreError::DuplicateIdentifier => AuthError::AccessDenied,
            StoreError::Unavailable(_) | StoreError::Corrupt(_) => {
                warn!(error = %e, "credential store failure surfaced as generic error");
                AuthError::StorageUnavailable
            }
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "message": self.message() }))).into_response()
    }
}

/// Successful login: a signed token plus the account it belongs to.
#[derive(Debug)]
pub struct LoginOutcome {
    pub token: String,
    pub account: Account,
}

/// Credential issuer.
///
/// Generic `AuthDenied` for unknown identifier or secret mismatch (no
/// enumeration oracle); `AccountInactive` only when the credentials matched.
/// Persists the login timestamp as a side effect.
pub fn login(
    store: &AccountStore,
    token_secret: &[u8],
    identifier: &str,
    secret_plain: &str,
    now: DateTime<Utc>,
) -> Result<LoginOutcome, AuthError> {
    let account = store
        .find_by_identifier(identifier)
        .ok_or(AuthError::AuthDenied)?;

    let matched = secret::verify_secret(secret_plain, &account.secret_hash).map_err(|e| {
        warn!(account_id = %account.id, error = %e, "stored secret hash unreadable");
        AuthError::AuthDenied
    })?;
    if !matched {
        return Err(AuthError::AuthDenied);
    }

    if !account.active {
        return Err(AuthError::AccountInactive);
    }

    let account = store.record_login(&account.id, now)?;
    let token = token::issue(&account.id, account.role, now, token_secret);
    debug!(account_id = %account.id, "login succeeded, token issued");
    Ok(LoginOutcome { token, account })
}

/// Extract the bearer token from an `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Request gate. Runs before every authorization-required REST handler.
///
/// 1. Verify token signature + expiry (uniform `TokenInvalid` on any defect).
/// 2. Re-fetch the account fresh from the store (`AccountNotFound` if gone).
/// 3. Check the live `active` flag (`AccountInactive` if cleared); this path
///    additionally pushes a best-effort addressed deauthorization event to
///    the account's registered channel before the 403 goes out, closing the
///    staleness gap between REST rejection and realtime awareness.
pub fn gate_request(
    store: &AccountStore,
    registry: &ConnectionRegistry,
    token_secret: &[u8],
    headers: &HeaderMap,
    now: DateTime<Utc>,
) -> Result<Account, AuthError> {
    let raw = bearer_token(headers).ok_or(AuthError::TokenInvalid)?;
    let claims = token::verify(raw, token_secret, now).map_err(|e| {
        debug!(error = %e, "token verification failed");
        AuthError::TokenInvalid
    })?;

    let account = store
        .get(&claims.account_id)
        .ok_or(AuthError::AccountNotFound)?;

    if !account.active {
        push_deauth(registry, &account.id, DeauthReason::Deactivated);
        return Err(AuthError::AccountInactive);
    }

    Ok(account)
}

/// Admin-role check for mutation endpoints.
pub fn require_admin(account: &Account) -> Result<(), AuthError> {
    if account.role == Role::Admin {
        Ok(())
    } else {
        Err(AuthError::AccessDenied)
    }
}
