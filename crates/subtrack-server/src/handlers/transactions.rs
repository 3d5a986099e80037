//! Raw transaction handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, Request, State},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::{get_actor, AppError, AppState, MAX_PAGE_LIMIT, MAX_UPLOAD_SIZE};
use subtrack_core::import::{ingest_transactions, parse_csv, IngestStats};
use subtrack_core::models::{BankTransaction, DEFAULT_CURRENCY};

#[derive(Debug, Deserialize)]
pub struct ListTransactionsQuery {
    pub since: Option<NaiveDate>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

/// GET /api/users/:id/transactions - List raw transactions, newest first
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<Json<Vec<BankTransaction>>, AppError> {
    state
        .db
        .get_user(user_id)?
        .ok_or_else(|| AppError::not_found(&format!("User {} not found", user_id)))?;

    let limit = query.limit.clamp(1, MAX_PAGE_LIMIT);
    let transactions = state
        .db
        .list_bank_transactions(user_id, query.since, Some(limit))?;
    Ok(Json(transactions))
}

#[derive(Debug, Deserialize)]
pub struct ImportQuery {
    /// Currency for rows without a currency column
    pub currency: Option<String>,
}

/// POST /api/users/:id/transactions/import - Import a CSV statement (raw body)
pub async fn import_transactions(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
    Query(query): Query<ImportQuery>,
    request: Request,
) -> Result<Json<IngestStats>, AppError> {
    let actor = get_actor(request.headers());
    state
        .db
        .get_user(user_id)?
        .ok_or_else(|| AppError::not_found(&format!("User {} not found", user_id)))?;

    let bytes = axum::body::to_bytes(request.into_body(), MAX_UPLOAD_SIZE)
        .await
        .map_err(|_| AppError::bad_request("Invalid request body or file too large (max 10MB)"))?;
    if bytes.is_empty() {
        return Err(AppError::bad_request("No CSV data provided"));
    }

    let currency = query.currency.as_deref().unwrap_or(DEFAULT_CURRENCY);
    let transactions = parse_csv(bytes.as_ref(), currency)?;
    let stats = ingest_transactions(&state.db, user_id, None, &transactions)?;

    state.db.log_audit(
        &actor,
        "import",
        Some("user"),
        Some(user_id),
        Some(&format!(
            "received={}, inserted={}, duplicates={}",
            stats.received, stats.inserted, stats.duplicates
        )),
    )?;

    Ok(Json(stats))
}
