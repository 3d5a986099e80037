//! User, plan and dashboard handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{get_actor, AppError, AppState};
use subtrack_core::models::{BillingStatus, Dashboard, Plan, User};
use subtrack_core::DeleteUserResult;

/// A user with derived plan access
#[derive(Serialize)]
pub struct UserResponse {
    #[serde(flatten)]
    pub user: User,
    pub is_pro: bool,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        let is_pro = user.is_pro(Utc::now());
        Self { user, is_pro }
    }
}

fn load_user(state: &AppState, id: i64) -> Result<User, AppError> {
    state
        .db
        .get_user(id)?
        .ok_or_else(|| AppError::not_found(&format!("User {} not found", id)))
}

/// GET /api/users - List users
pub async fn list_users(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<UserResponse>>, AppError> {
    let users = state.db.list_users()?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub name: Option<String>,
}

/// POST /api/users - Create a user on the free plan
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    let actor = get_actor(&headers);
    let user = state.db.create_user(&body.email, body.name.as_deref())?;

    state
        .db
        .log_audit(&actor, "create", Some("user"), Some(user.id), None)?;

    Ok((StatusCode::CREATED, Json(user.into())))
}

/// GET /api/users/:id - Get a user
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<UserResponse>, AppError> {
    Ok(Json(load_user(&state, id)?.into()))
}

/// DELETE /api/users/:id - Delete a user and everything they own
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<DeleteUserResult>, AppError> {
    let actor = get_actor(&headers);
    let result = state.db.delete_user(id)?;

    state.db.log_audit(
        &actor,
        "delete",
        Some("user"),
        Some(id),
        Some(&serde_json::to_string(&result)?),
    )?;

    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct SetPlanRequest {
    pub plan: String,
    pub billing_status: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// PUT /api/users/:id/plan - Set a user's plan directly
///
/// Billing status defaults to `none` for the free plan and `active` otherwise.
pub async fn set_user_plan(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<SetPlanRequest>,
) -> Result<Json<UserResponse>, AppError> {
    let actor = get_actor(&headers);
    let plan: Plan = body.plan.parse().map_err(|e: String| AppError::bad_request(&e))?;
    let billing_status = match body.billing_status {
        Some(s) => s.parse().map_err(|e: String| AppError::bad_request(&e))?,
        None if plan == Plan::Free => BillingStatus::None,
        None => BillingStatus::Active,
    };
    let expires_at = if plan == Plan::Free { None } else { body.expires_at };

    let user = state
        .db
        .set_user_plan(id, plan, billing_status, expires_at)?;

    state.db.log_audit(
        &actor,
        "set_plan",
        Some("user"),
        Some(id),
        Some(&format!("plan={}, billing_status={}", plan, billing_status)),
    )?;

    Ok(Json(user.into()))
}

/// GET /api/users/:id/dashboard - Subscription totals and upcoming charges
pub async fn get_dashboard(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Dashboard>, AppError> {
    let dashboard = state.db.get_dashboard(id, Utc::now())?;
    Ok(Json(dashboard))
}
