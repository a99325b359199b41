//! HTTP server implementation
//!
//! Implements:
//! - Auth API (POST /auth/login, GET /auth/profile)
//! - Accounts CRUD (admin only) with status toggle and delete, both of which
//!   synchronously invoke the deauthorization broadcaster
//! - Status check (GET /accounts/{id}/status) used by client watchdog polls
//! - Sentiment analysis passthrough (POST /sentiment/analyze)
//! - Health check (GET /health)
//!
//! Every authorization-required handler runs the request gate first: token
//! verify, fresh account re-fetch, live active check.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::accounts::{Account, AccountView, Role};
use crate::auth::{self, AuthError};
use crate::server::broadcast::{broadcast_deauth, DeauthReason};
use crate::server::GatewayState;
use crate::store::{secret, StoreError};

/// Build the HTTP router (everything except the `/ws` route). State is
/// applied by the caller after merging in the realtime route.
pub fn create_router() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/profile", get(profile_handler))
        .route("/accounts", get(list_accounts_handler))
        .route("/accounts", post(create_account_handler))
        .route("/accounts/:id", patch(update_account_handler))
        .route("/accounts/:id", delete(delete_account_handler))
        .route("/accounts/:id/status", patch(toggle_status_handler))
        .route("/accounts/:id/status", get(status_check_handler))
        .route("/sentiment/analyze", post(analyze_handler))
}

fn map_store_error(e: StoreError) -> Response {
    match e {
        StoreError::NotFound => AuthError::AccountNotFound.into_response(),
        StoreError::DuplicateIdentifier => (
            StatusCode::CONFLICT,
            Json(json!({ "message": "Identifier already in use" })),
        )
            .into_response(),
        other => {
            warn!(error = %other, "store operation failed");
            AuthError::StorageUnavailable.into_response()
        }
    }
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_ms": state.start_time.elapsed().as_millis() as u64,
    }))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    identifier: String,
    secret: String,
}

async fn login_handler(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<serde_json::Value>, AuthError> {
    let outcome = auth::login(
        &state.store,
        &state.token_secret,
        &req.identifier,
        &req.secret,
        Utc::now(),
    )?;
    Ok(Json(json!({
        "token": outcome.token,
        "account": AccountView::from(&outcome.account),
    })))
}

async fn profile_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> Result<Json<AccountView>, AuthError> {
    let account = gate(&state, &headers)?;
    Ok(Json(AccountView::from(&account)))
}

async fn list_accounts_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<AccountView>>, AuthError> {
    let caller = gate(&state, &headers)?;
    auth::require_admin(&caller)?;
    let views = state.store.list().iter().map(AccountView::from).collect();
    Ok(Json(views))
}

#[derive(Debug, Deserialize)]
struct CreateAccountRequest {
    identifier: String,
    secret: String,
    #[serde(default = "default_role")]
    role: Role,
    display_name: String,
    #[serde(default)]
    department: Option<String>,
}

fn default_role() -> Role {
    Role::Agent
}

async fn create_account_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(req): Json<CreateAccountRequest>,
) -> Result<Response, AuthError> {
    let caller = gate(&state, &headers)?;
    auth::require_admin(&caller)?;

    let secret_hash = secret::hash_secret(&req.secret).map_err(|e| {
        warn!(error = %e, "secret hashing failed");
        AuthError::StorageUnavailable
    })?;
    let account = Account {
        id: Uuid::new_v4().to_string(),
        identifier: req.identifier.trim().to_lowercase(),
        secret_hash,
        role: req.role,
        display_name: req.display_name,
        department: req.department,
        active: true,
        last_login_at: None,
        created_at: Utc::now(),
    };

    if let Err(e) = state.store.insert(account.clone()) {
        return Ok(map_store_error(e));
    }
    info!(account_id = %account.id, role = account.role.as_str(), "account created");
    Ok((StatusCode::CREATED, Json(AccountView::from(&account))).into_response())
}

#[derive(Debug, Deserialize)]
struct UpdateAccountRequest {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    department: Option<String>,
    #[serde(default)]
    role: Option<Role>,
    #[serde(default)]
    secret: Option<String>,
}

async fn update_account_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<UpdateAccountRequest>,
) -> Result<Response, AuthError> {
    let caller = gate(&state, &headers)?;
    auth::require_admin(&caller)?;

    let secret_hash = match &req.secret {
        Some(plain) => Some(secret::hash_secret(plain).map_err(|e| {
            warn!(error = %e, "secret hashing failed");
            AuthError::StorageUnavailable
        })?),
        None => None,
    };

    let updated = state.store.update(&id, |account| {
        if let Some(name) = req.display_name.clone() {
            account.display_name = name;
        }
        if let Some(department) = req.department.clone() {
            account.department = Some(department);
        }
        if let Some(role) = req.role {
            account.role = role;
        }
        if let Some(hash) = secret_hash.clone() {
            account.secret_hash = hash;
        }
    });
    match updated {
        Ok(account) => Ok(Json(AccountView::from(&account)).into_response()),
        Err(e) => Ok(map_store_error(e)),
    }
}

#[derive(Debug, Deserialize)]
struct ToggleStatusRequest {
    active: bool,
}

/// Toggle the live `active` flag. Deactivation synchronously invokes the
/// broadcaster: addressed event plus full sweep. Reactivation broadcasts
/// nothing.
async fn toggle_status_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<ToggleStatusRequest>,
) -> Result<Response, AuthError> {
    let caller = gate(&state, &headers)?;
    auth::require_admin(&caller)?;

    let updated = match state.store.set_active(&id, req.active) {
        Ok(account) => account,
        Err(e) => return Ok(map_store_error(e)),
    };

    if !req.active {
        info!(account_id = %id, "account deactivated, broadcasting deauthorization");
        broadcast_deauth(&state.registry, &id, DeauthReason::Deactivated);
    }

    Ok(Json(AccountView::from(&updated)).into_response())
}

async fn delete_account_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AuthError> {
    let caller = gate(&state, &headers)?;
    auth::require_admin(&caller)?;

    if let Err(e) = state.store.remove(&id) {
        return Ok(map_store_error(e));
    }

    info!(account_id = %id, "account deleted, broadcasting deauthorization");
    broadcast_deauth(&state.registry, &id, DeauthReason::Deleted);

    Ok(Json(json!({ "message": "Account deleted successfully" })).into_response())
}

/// Authoritative status check backing the client watchdog polls.
/// 404 means deleted; `{active:false}` means deactivated.
async fn status_check_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AuthError> {
    gate(&state, &headers)?;
    match state.store.get(&id) {
        Some(account) => Ok(Json(json!({
            "exists": true,
            "active": account.active,
        }))
        .into_response()),
        None => Err(AuthError::AccountNotFound),
    }
}

#[derive(Debug, Deserialize)]
struct AnalyzeRequest {
    text: String,
}

async fn analyze_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Response, AuthError> {
    gate(&state, &headers)?;

    let Some(scorer) = &state.scorer else {
        return Ok((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "message": "Sentiment analysis is not configured" })),
        )
            .into_response());
    };
    if req.text.trim().is_empty() {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": "No text provided" })),
        )
            .into_response());
    }

    match scorer.analyze(&req.text).await {
        Ok(result) => Ok(Json(result).into_response()),
        Err(e) => {
            warn!(error = %e, "sentiment scoring failed");
            Ok((
                StatusCode::BAD_GATEWAY,
                Json(json!({ "message": "Sentiment analysis failed" })),
            )
                .into_response())
        }
    }
}

fn gate(state: &GatewayState, headers: &HeaderMap) -> Result<Account, AuthError> {
    auth::gate_request(
        &state.store,
        &state.registry,
        &state.token_secret,
        headers,
        Utc::now(),
    )
}
