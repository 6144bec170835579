//! System monitor endpoints.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::db::SystemSnapshot;
use crate::monitor::RestartOutcome;

use super::routes::{blocking, store_error, ApiError, AppState};

const DEFAULT_SNAPSHOT_LIMIT: usize = 100;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(current))
        .route("/snapshots", get(list_snapshots).post(record_snapshot))
        .route("/restart-service", post(restart_service))
}

#[derive(Debug, Deserialize)]
pub struct SnapshotQuery {
    pub limit: Option<usize>,
}

/// GET /api/system - Live sample, not persisted.
async fn current(State(state): State<Arc<AppState>>) -> Result<Json<SystemSnapshot>, ApiError> {
    blocking(&state, |state| Json(state.monitor.snapshot())).await
}

/// POST /api/system/snapshots - Sample and persist.
async fn record_snapshot(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SystemSnapshot>, ApiError> {
    blocking(&state, |state| state.monitor.persist_snapshot(&state.store))
        .await?
        .map(Json)
        .ok_or_else(|| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to save system snapshot".to_string(),
            )
        })
}

/// GET /api/system/snapshots?limit=N - Newest first.
async fn list_snapshots(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SnapshotQuery>,
) -> Result<Json<Vec<SystemSnapshot>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_SNAPSHOT_LIMIT);
    blocking(&state, move |state| state.store.snapshots(limit))
        .await?
        .map(Json)
        .map_err(store_error)
}

/// POST /api/system/restart-service
async fn restart_service(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RestartOutcome>, ApiError> {
    let outcome = blocking(&state, |state| state.monitor.restart_service()).await?;
    if !outcome.succeeded() {
        tracing::warn!(
            stop_ok = outcome.stop_ok,
            start_ok = outcome.start_ok,
            "Service restart incomplete"
        );
    }
    Ok(Json(outcome))
}
