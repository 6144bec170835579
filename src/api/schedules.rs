//! Scheduled task and execution log endpoints.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::db::{NewScheduledTask, ScheduledTask, SweepReport, TaskExecutionRecord};

use super::routes::{blocking, store_error, ApiError, AppState};

const DEFAULT_EXECUTION_LIMIT: usize = 50;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_tasks).post(create_task))
        .route("/sweep", post(sweep))
}

pub fn execution_routes() -> Router<Arc<AppState>> {
    Router::new().route("/", get(list_executions))
}

#[derive(Debug, Deserialize)]
pub struct AgentFilter {
    pub agent: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExecutionQuery {
    pub agent: Option<String>,
    pub limit: Option<usize>,
}

/// GET /api/schedules?agent=NAME - Ordered by next run.
async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<AgentFilter>,
) -> Result<Json<Vec<ScheduledTask>>, ApiError> {
    blocking(&state, move |state| {
        Json(state.scheduler.tasks(filter.agent.as_deref()))
    })
    .await
}

/// POST /api/schedules - Create a task; its first run is `schedule_time`.
async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewScheduledTask>,
) -> Result<Json<ScheduledTask>, ApiError> {
    if req.agent_name.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Agent name cannot be empty".to_string(),
        ));
    }
    if req.task_name.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Task name cannot be empty".to_string(),
        ));
    }

    blocking(&state, move |state| {
        let id = state.scheduler.add_task(req).ok_or_else(|| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to add scheduled task".to_string(),
            )
        })?;
        state
            .store
            .scheduled_task(id)
            .map_err(store_error)?
            .map(Json)
            .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Scheduled task {} not found", id)))
    })
    .await?
}

/// POST /api/schedules/sweep - Fire due tasks now instead of waiting for the next wake.
async fn sweep(State(state): State<Arc<AppState>>) -> Result<Json<SweepReport>, ApiError> {
    blocking(&state, |state| Json(state.scheduler.run_sweep())).await
}

/// GET /api/executions?agent=NAME&limit=N - Newest first.
async fn list_executions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ExecutionQuery>,
) -> Result<Json<Vec<TaskExecutionRecord>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_EXECUTION_LIMIT);
    blocking(&state, move |state| {
        state.store.executions(query.agent.as_deref(), limit)
    })
    .await?
    .map(Json)
    .map_err(store_error)
}
