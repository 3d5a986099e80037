//! Liveness endpoint

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::{AppError, AppState};
use subtrack_core::bank::BankProvider;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub schema_version: i64,
    pub bank_provider: Option<String>,
}

/// GET /api/health - Liveness and schema version
pub async fn health(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, AppError> {
    let schema_version = state.db.schema_version()?;
    Ok(Json(HealthResponse {
        status: "ok",
        schema_version,
        bank_provider: state.bank.as_ref().map(|b| b.name().to_string()),
    }))
}
