//! Subscription management handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, Request, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;

use crate::{get_actor, AppError, AppState, SuccessResponse};
use subtrack_core::models::{NewManualSubscription, Subscription, SubscriptionStatus};

/// Query params for listing subscriptions
#[derive(Debug, Deserialize)]
pub struct ListSubscriptionsQuery {
    /// Filter by status (active, cancelled, excluded)
    pub status: Option<String>,
}

/// GET /api/users/:id/subscriptions - List a user's subscriptions
pub async fn list_subscriptions(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
    Query(query): Query<ListSubscriptionsQuery>,
) -> Result<Json<Vec<Subscription>>, AppError> {
    state
        .db
        .get_user(user_id)?
        .ok_or_else(|| AppError::not_found(&format!("User {} not found", user_id)))?;

    let status: Option<SubscriptionStatus> = query
        .status
        .as_deref()
        .map(str::parse)
        .transpose()
        .map_err(|e: String| AppError::bad_request(&e))?;

    let subscriptions = state.db.list_subscriptions(user_id, status)?;
    Ok(Json(subscriptions))
}

/// POST /api/users/:id/subscriptions - Add a subscription by hand
pub async fn create_subscription(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<NewManualSubscription>,
) -> Result<(StatusCode, Json<Subscription>), AppError> {
    let actor = get_actor(&headers);
    state
        .db
        .get_user(user_id)?
        .ok_or_else(|| AppError::not_found(&format!("User {} not found", user_id)))?;

    let subscription = state.db.create_manual_subscription(user_id, &body)?;

    state.db.log_audit(
        &actor,
        "create",
        Some("subscription"),
        Some(subscription.id),
        Some(&format!("merchant={}", subscription.merchant)),
    )?;

    Ok((StatusCode::CREATED, Json(subscription)))
}

/// GET /api/subscriptions/:id - Get a subscription
pub async fn get_subscription(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Subscription>, AppError> {
    let subscription = state
        .db
        .get_subscription(id)?
        .ok_or_else(|| AppError::not_found(&format!("Subscription {} not found", id)))?;
    Ok(Json(subscription))
}

/// DELETE /api/subscriptions/:id - Delete a subscription
///
/// A detected subscription comes back on the next scan unless excluded.
pub async fn delete_subscription(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    request: Request,
) -> Result<Json<SuccessResponse>, AppError> {
    let actor = get_actor(request.headers());

    state.db.delete_subscription(id)?;

    state
        .db
        .log_audit(&actor, "delete", Some("subscription"), Some(id), None)?;

    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    /// Defaults to today
    pub date: Option<NaiveDate>,
}

/// POST /api/subscriptions/:id/cancel - Mark subscription as cancelled
pub async fn cancel_subscription(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    body: Option<Json<CancelRequest>>,
) -> Result<Json<Subscription>, AppError> {
    let actor = get_actor(&headers);
    let on = body
        .and_then(|Json(b)| b.date)
        .unwrap_or_else(|| Utc::now().date_naive());

    state.db.cancel_subscription(id, on)?;

    state.db.log_audit(
        &actor,
        "cancel",
        Some("subscription"),
        Some(id),
        Some(&format!("date={}", on)),
    )?;

    get_subscription(State(state), Path(id)).await
}

/// POST /api/subscriptions/:id/exclude - Exclude from detection (not a subscription)
///
/// The merchant stays excluded for this user across future scans.
pub async fn exclude_subscription(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    request: Request,
) -> Result<Json<Subscription>, AppError> {
    let actor = get_actor(request.headers());

    state.db.exclude_subscription(id)?;

    state.db.log_audit(
        &actor,
        "exclude",
        Some("subscription"),
        Some(id),
        Some("marked as not a subscription"),
    )?;

    get_subscription(State(state), Path(id)).await
}

/// POST /api/subscriptions/:id/reactivate - Return to active and clear the exclusion
pub async fn reactivate_subscription(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    request: Request,
) -> Result<Json<Subscription>, AppError> {
    let actor = get_actor(request.headers());

    state.db.reactivate_subscription(id)?;

    state
        .db
        .log_audit(&actor, "reactivate", Some("subscription"), Some(id), None)?;

    get_subscription(State(state), Path(id)).await
}
