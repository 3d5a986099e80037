//! Plan purchase handlers
//!
//! Checkout itself happens at the payment provider; these endpoints record
//! the pending purchase and apply it once the provider confirms.

use std::sync::Arc;

use axum::{
    extract::{Path, Request, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use serde::Deserialize;

use crate::{get_actor, AppError, AppState, SuccessResponse};
use subtrack_core::models::{Payment, Plan, DEFAULT_CURRENCY};

/// GET /api/users/:id/payments - List a user's payments
pub async fn list_payments(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Result<Json<Vec<Payment>>, AppError> {
    state
        .db
        .get_user(user_id)?
        .ok_or_else(|| AppError::not_found(&format!("User {} not found", user_id)))?;
    Ok(Json(state.db.list_payments(user_id)?))
}

#[derive(Debug, Deserialize)]
pub struct RecordPaymentRequest {
    pub reference: String,
    pub plan: String,
    pub amount: f64,
    pub currency: Option<String>,
}

/// POST /api/users/:id/payments - Record a pending purchase
pub async fn record_payment(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<RecordPaymentRequest>,
) -> Result<(StatusCode, Json<Payment>), AppError> {
    let actor = get_actor(&headers);
    let plan: Plan = body
        .plan
        .parse()
        .map_err(|e: String| AppError::bad_request(&e))?;
    let reference = body.reference.trim();
    if reference.is_empty() {
        return Err(AppError::bad_request("reference is required"));
    }
    let currency = body.currency.as_deref().unwrap_or(DEFAULT_CURRENCY);

    let payment = state
        .db
        .record_payment(user_id, reference, plan, body.amount, currency)?;

    state.db.log_audit(
        &actor,
        "record",
        Some("payment"),
        Some(payment.id),
        Some(&format!("reference={}, plan={}", reference, plan)),
    )?;

    Ok((StatusCode::CREATED, Json(payment)))
}

/// POST /api/payments/:reference/complete - Confirm a payment and grant its plan
pub async fn complete_payment(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
    request: Request,
) -> Result<Json<Payment>, AppError> {
    let actor = get_actor(request.headers());

    let payment = state.db.complete_payment(&reference, Utc::now())?;

    state.db.log_audit(
        &actor,
        "complete",
        Some("payment"),
        Some(payment.id),
        Some(&format!("plan={}", payment.plan)),
    )?;

    Ok(Json(payment))
}

/// POST /api/payments/:reference/fail - Mark a pending payment failed
pub async fn fail_payment(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
    request: Request,
) -> Result<Json<SuccessResponse>, AppError> {
    let actor = get_actor(request.headers());

    state.db.fail_payment(&reference)?;
    let payment_id = state.db.get_payment(&reference)?.map(|p| p.id);

    state.db.log_audit(
        &actor,
        "fail",
        Some("payment"),
        payment_id,
        Some(&format!("reference={}", reference)),
    )?;

    Ok(Json(SuccessResponse { success: true }))
}
