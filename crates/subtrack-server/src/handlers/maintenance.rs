//! Maintenance handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;

use crate::{get_actor, AppError, AppState};
use subtrack_core::maintenance::{self, IntegrityReport, PruneResult};

/// GET /api/maintenance/report - Row counts and consistency checks
pub async fn integrity_report(
    State(state): State<Arc<AppState>>,
) -> Result<Json<IntegrityReport>, AppError> {
    Ok(Json(state.db.integrity_report()?))
}

#[derive(Debug, Deserialize)]
pub struct PruneQuery {
    #[serde(default)]
    pub dry_run: bool,
}

/// POST /api/users/:id/prune - Remove detected subscriptions the current rules reject
pub async fn prune_subscriptions(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
    Query(query): Query<PruneQuery>,
    headers: HeaderMap,
) -> Result<Json<PruneResult>, AppError> {
    let actor = get_actor(&headers);

    let result = maintenance::prune_subscriptions(
        &state.db,
        user_id,
        &state.config.detection,
        query.dry_run,
    )?;

    if !result.dry_run {
        state.db.log_audit(
            &actor,
            "prune",
            Some("user"),
            Some(user_id),
            Some(&format!("removed={}", result.pruned.len())),
        )?;
    }

    Ok(Json(result))
}
