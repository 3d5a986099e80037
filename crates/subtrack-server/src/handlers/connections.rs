//! Bank connection handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Request, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;

use crate::{get_actor, AppError, AppState, SuccessResponse};
use subtrack_core::bank::BankClient;
use subtrack_core::models::BankConnection;
use subtrack_core::sync::{self, LinkCompleted, LinkStarted, SyncResult};

fn require_bank(state: &AppState) -> Result<&BankClient, AppError> {
    state
        .bank
        .as_ref()
        .ok_or_else(|| AppError::service_unavailable("No bank provider configured"))
}

/// GET /api/users/:id/connections - List a user's bank connections
pub async fn list_connections(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Result<Json<Vec<BankConnection>>, AppError> {
    state
        .db
        .get_user(user_id)?
        .ok_or_else(|| AppError::not_found(&format!("User {} not found", user_id)))?;
    Ok(Json(state.db.list_connections(Some(user_id))?))
}

#[derive(Debug, Deserialize)]
pub struct LinkRequest {
    pub institution_id: String,
    /// Overrides the configured redirect URL
    pub redirect_url: Option<String>,
}

/// POST /api/users/:id/connections - Start linking a bank account
///
/// The response carries the link the user must open to authorize access.
pub async fn link_connection(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<LinkRequest>,
) -> Result<(StatusCode, Json<LinkStarted>), AppError> {
    let actor = get_actor(&headers);
    let bank = require_bank(&state)?;
    let redirect_url = body
        .redirect_url
        .as_deref()
        .unwrap_or(&state.config.redirect_url);

    let started = sync::link_connection(
        &state.db,
        bank,
        user_id,
        &body.institution_id,
        redirect_url,
        Utc::now(),
    )
    .await?;

    state.db.log_audit(
        &actor,
        "link",
        Some("connection"),
        Some(started.connection_id),
        Some(&format!("institution={}", body.institution_id.trim())),
    )?;

    Ok((StatusCode::CREATED, Json(started)))
}

/// POST /api/connections/:id/complete - Check the authorization and pick up accounts
pub async fn complete_connection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    request: Request,
) -> Result<Json<LinkCompleted>, AppError> {
    let actor = get_actor(request.headers());
    let bank = require_bank(&state)?;

    let completed = sync::complete_connection(&state.db, bank, id).await?;

    state.db.log_audit(
        &actor,
        "complete",
        Some("connection"),
        Some(id),
        Some(&format!(
            "status={}, additional={}",
            completed.connection.status,
            completed.additional_connections.len()
        )),
    )?;

    Ok(Json(completed))
}

#[derive(Debug, Default, Deserialize)]
pub struct SyncRequest {
    /// Fetch from this date instead of the last sync
    pub since: Option<NaiveDate>,
}

/// POST /api/connections/:id/sync - Pull new transactions from the bank
pub async fn sync_connection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    body: Option<Json<SyncRequest>>,
) -> Result<Json<SyncResult>, AppError> {
    let actor = get_actor(&headers);
    let bank = require_bank(&state)?;
    let since = body.and_then(|Json(b)| b.since);

    let result = sync::sync_connection(&state.db, bank, id, since, Utc::now()).await?;

    state.db.log_audit(
        &actor,
        "sync",
        Some("connection"),
        Some(id),
        Some(&format!(
            "fetched={}, inserted={}",
            result.fetched, result.inserted
        )),
    )?;

    Ok(Json(result))
}

/// DELETE /api/connections/:id - Remove a connection, keeping its transactions
pub async fn delete_connection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    request: Request,
) -> Result<Json<SuccessResponse>, AppError> {
    let actor = get_actor(request.headers());

    state.db.delete_connection(id)?;

    state
        .db
        .log_audit(&actor, "delete", Some("connection"), Some(id), None)?;

    Ok(Json(SuccessResponse { success: true }))
}
