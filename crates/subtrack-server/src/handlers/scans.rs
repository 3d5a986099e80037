//! Detection scan handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{get_actor, AppError, AppState, MAX_PAGE_LIMIT};
use subtrack_core::bank::BankProvider;
use subtrack_core::detect::{RecurrenceDetector, ScanOutcome};
use subtrack_core::models::{BankScan, ConnectionStatus, Subscription};

#[derive(Debug, Deserialize)]
pub struct ListScansQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    20
}

/// GET /api/users/:id/scans - Scan history, newest first
pub async fn list_scans(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
    Query(query): Query<ListScansQuery>,
) -> Result<Json<Vec<BankScan>>, AppError> {
    state
        .db
        .get_user(user_id)?
        .ok_or_else(|| AppError::not_found(&format!("User {} not found", user_id)))?;

    let limit = query.limit.clamp(1, MAX_PAGE_LIMIT);
    Ok(Json(state.db.list_scans(user_id, limit)?))
}

/// Label recorded on the scan: the bank provider when the user has a linked
/// connection through it, otherwise the data came from CSV imports
fn scan_provider(state: &AppState, user_id: i64) -> Result<String, AppError> {
    if let Some(bank) = &state.bank {
        let linked = state
            .db
            .list_connections(Some(user_id))?
            .into_iter()
            .any(|c| c.status == ConnectionStatus::Linked && c.provider == bank.name());
        if linked {
            return Ok(bank.name().to_string());
        }
    }
    Ok("csv".to_string())
}

/// POST /api/users/:id/scans - Run recurrence detection for a user
///
/// Returns 402 once the user's plan allows no further scans.
pub async fn run_scan(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<ScanOutcome>, AppError> {
    let actor = get_actor(&headers);
    let provider = scan_provider(&state, user_id)?;

    let detector = RecurrenceDetector::with_config(&state.db, state.config.detection.clone());
    let outcome = detector.run_scan(user_id, &provider, Utc::now())?;

    info!(
        "Scan {} for user {}: {} subscriptions from {} transactions",
        outcome.scan_id, user_id, outcome.subscriptions_found, outcome.transactions_scanned
    );

    state.db.log_audit(
        &actor,
        "scan",
        Some("user"),
        Some(user_id),
        Some(&format!(
            "scan_id={}, found={}, inserted={}, lapsed={}",
            outcome.scan_id, outcome.subscriptions_found, outcome.inserted, outcome.lapsed
        )),
    )?;

    Ok(Json(outcome))
}

/// A scan with the subscriptions it found
#[derive(Serialize)]
pub struct ScanDetail {
    #[serde(flatten)]
    pub scan: BankScan,
    pub subscriptions: Vec<Subscription>,
}

/// GET /api/scans/:id - Get a scan and its subscriptions
pub async fn get_scan(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ScanDetail>, AppError> {
    let scan = state
        .db
        .get_scan(id)?
        .ok_or_else(|| AppError::not_found(&format!("Scan {} not found", id)))?;
    let subscriptions = state.db.list_scan_subscriptions(id)?;
    Ok(Json(ScanDetail {
        scan,
        subscriptions,
    }))
}
