//! Agent lifecycle API endpoints.
//!
//! - List agent statuses
//! - Start / stop the collective worker process
//! - Record an ad-hoc agent action and complete it later
//! - Back up an agent data file to the deployment targets

use axum::{
    extract::{Path as AxumPath, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::db::{AgentStatus, ExecutionStatus, TaskExecutionRecord};

use super::routes::{blocking, store_error, ApiError, AppState};

/// Create agent routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_agents))
        .route("/start", post(start_agents))
        .route("/stop", post(stop_agents))
        .route("/:name/actions", post(record_action))
        .route("/:name/backup", post(backup_agent))
}

/// Routes for execution records created by agent actions.
pub fn action_routes() -> Router<Arc<AppState>> {
    Router::new().route("/:id/complete", post(complete_action))
}

// ─────────────────────────────────────────────────────────────────────────────
// Request/Response Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct AgentsResponse {
    /// Whether the worker process is alive.
    pub running: bool,
    pub agents: Vec<AgentStatus>,
}

#[derive(Debug, Serialize)]
pub struct LifecycleResponse {
    /// Whether this request changed the lifecycle state.
    pub changed: bool,
    pub running: bool,
}

#[derive(Debug, Deserialize)]
pub struct RecordActionRequest {
    pub task_type: String,
    pub result: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BackupRequest {
    /// Local file to upload.
    pub path: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct BackupResponse {
    pub ok: bool,
}

#[derive(Debug, Deserialize)]
pub struct CompleteActionRequest {
    pub status: ExecutionStatus,
    pub result: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET /api/agents - Status of every known agent.
async fn list_agents(State(state): State<Arc<AppState>>) -> Result<Json<AgentsResponse>, ApiError> {
    blocking(&state, |state| {
        Json(AgentsResponse {
            running: state.agents.is_running(),
            agents: state.agents.statuses(),
        })
    })
    .await
}

/// POST /api/agents/start
async fn start_agents(
    State(state): State<Arc<AppState>>,
) -> Result<Json<LifecycleResponse>, ApiError> {
    blocking(&state, |state| {
        let changed = state.agents.start();
        Json(LifecycleResponse {
            changed,
            running: state.agents.is_running(),
        })
    })
    .await
}

/// POST /api/agents/stop
async fn stop_agents(State(state): State<Arc<AppState>>) -> Result<Json<LifecycleResponse>, ApiError> {
    blocking(&state, |state| {
        let changed = state.agents.stop();
        Json(LifecycleResponse {
            changed,
            running: state.agents.is_running(),
        })
    })
    .await
}

/// POST /api/agents/:name/actions - Append a running execution record.
async fn record_action(
    State(state): State<Arc<AppState>>,
    AxumPath(name): AxumPath<String>,
    Json(req): Json<RecordActionRequest>,
) -> Result<Json<TaskExecutionRecord>, ApiError> {
    if req.task_type.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Task type cannot be empty".to_string(),
        ));
    }

    blocking(&state, move |state| {
        let id = state
            .agents
            .record_action(&name, &req.task_type, req.result.as_deref())
            .ok_or_else(|| {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to record action".to_string(),
                )
            })?;
        state
            .store
            .execution(id)
            .map_err(store_error)?
            .map(Json)
            .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Execution {} not found", id)))
    })
    .await?
}

/// POST /api/agents/:name/backup - Upload a data file to every configured target.
///
/// Upload failures answer 200 with `ok: false`; details are in the log.
async fn backup_agent(
    State(state): State<Arc<AppState>>,
    AxumPath(name): AxumPath<String>,
    Json(req): Json<BackupRequest>,
) -> Result<Json<BackupResponse>, ApiError> {
    if req.path.as_os_str().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Path cannot be empty".to_string()));
    }

    let ok = state.bridge.backup_agent_data(&name, &req.path).await;
    Ok(Json(BackupResponse { ok }))
}

/// POST /api/actions/:id/complete - Write the completion fields once.
async fn complete_action(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<i64>,
    Json(req): Json<CompleteActionRequest>,
) -> Result<Json<TaskExecutionRecord>, ApiError> {
    if !req.status.is_finished() {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("Status must be completed or failed, got {}", req.status),
        ));
    }

    blocking(&state, move |state| {
        let completed = state
            .agents
            .complete_action(id, req.status, req.result.as_deref());
        let record = state
            .store
            .execution(id)
            .map_err(store_error)?
            .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Execution {} not found", id)))?;
        if !completed {
            return Err((
                StatusCode::CONFLICT,
                format!("Execution {} is already completed", id),
            ));
        }
        Ok(Json(record))
    })
    .await?
}

#[cfg(test)]
mod tests {
    use crate::api::routes::test_support::TestApp;
    use crate::bridge::{BridgeError, DeployTarget, DeploymentBridge, UploadScope};
    use crate::db::DeployTargetKind;
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    /// Drive stand-in that remembers backup uploads.
    #[derive(Clone, Default)]
    struct RecordingTarget {
        uploads: Arc<Mutex<Vec<(String, String, Vec<u8>)>>>,
    }

    #[async_trait]
    impl DeployTarget for RecordingTarget {
        fn kind(&self) -> DeployTargetKind {
            DeployTargetKind::Gdrive
        }

        async fn upload(
            &self,
            name: &str,
            bytes: &[u8],
            scope: UploadScope<'_>,
        ) -> Result<String, BridgeError> {
            let UploadScope::Backup { agent } = scope else {
                return Err(BridgeError::NotConfigured("artifact uploads"));
            };
            self.uploads
                .lock()
                .unwrap()
                .push((agent.to_string(), name.to_string(), bytes.to_vec()));
            Ok("file-1".to_string())
        }
    }

    #[tokio::test]
    async fn test_list_defaults() {
        let app = TestApp::new();
        let (status, body) = app.get("/api/agents").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["running"], false);
        let agents = body["agents"].as_array().unwrap();
        assert_eq!(agents.len(), 2);
        assert_eq!(agents[0]["agent_name"], "Scout");
        assert_eq!(agents[0]["initialized"], false);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_clears() {
        let app = TestApp::with_agent_command("sleep", &["30"]);

        let (_, body) = app.post("/api/agents/start", json!({})).await;
        assert_eq!(body, json!({ "changed": true, "running": true }));
        let (_, body) = app.post("/api/agents/start", json!({})).await;
        assert_eq!(body, json!({ "changed": false, "running": true }));

        let (_, body) = app.get("/api/agents").await;
        assert_eq!(body["agents"][1]["running"], true);

        let (_, body) = app.post("/api/agents/stop", json!({})).await;
        assert_eq!(body, json!({ "changed": true, "running": false }));
        let (_, body) = app.post("/api/agents/stop", json!({})).await;
        assert_eq!(body["changed"], false);

        let (_, body) = app.get("/api/agents").await;
        assert_eq!(body["agents"][0]["running"], false);
        assert_eq!(body["agents"][0]["initialized"], true);
    }

    #[tokio::test]
    async fn test_action_record_and_complete() {
        let app = TestApp::new();
        let (status, record) = app
            .post(
                "/api/agents/Clicker/actions",
                json!({ "task_type": "click", "result": "Clicking ads" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(record["status"], "running");
        assert_eq!(record["agent_name"], "Clicker");
        let id = record["id"].as_i64().unwrap();

        let uri = format!("/api/actions/{}/complete", id);
        let (status, body) = app.post(&uri, json!({ "status": "pending" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);

        let (status, body) = app
            .post(&uri, json!({ "status": "completed", "result": "3 clicks" }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"], "3 clicks");
        assert!(body["completed_at"].is_string());

        let (status, _) = app.post(&uri, json!({ "status": "failed" })).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = app
            .post("/api/actions/999/complete", json!({ "status": "failed" }))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_action_requires_task_type() {
        let app = TestApp::new();
        let (status, _) = app
            .post("/api/agents/Scout/actions", json!({ "task_type": " " }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_backup_uploads_to_targets() {
        let target = RecordingTarget::default();
        let uploads = Arc::clone(&target.uploads);
        let app = TestApp::with_state(|state| {
            state.bridge = DeploymentBridge::new(state.store.clone()).with_target(target);
        });
        let file = app.dir.path().join("cookies.json");
        std::fs::write(&file, b"{\"session\":1}").unwrap();

        let (status, body) = app
            .post("/api/agents/Uploader/backup", json!({ "path": file }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "ok": true }));
        {
            let uploads = uploads.lock().unwrap();
            assert_eq!(uploads.len(), 1);
            assert_eq!(uploads[0].0, "Uploader");
            assert_eq!(uploads[0].1, "cookies.json");
            assert_eq!(uploads[0].2, b"{\"session\":1}");
        }

        let missing = app.dir.path().join("missing.json");
        let (_, body) = app
            .post("/api/agents/Uploader/backup", json!({ "path": missing }))
            .await;
        assert_eq!(body, json!({ "ok": false }));
        assert_eq!(uploads.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_backup_without_targets_fails() {
        let app = TestApp::new();
        let file = app.dir.path().join("notes.txt");
        std::fs::write(&file, b"notes").unwrap();

        let (status, body) = app
            .post("/api/agents/Scout/backup", json!({ "path": file }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "ok": false }));

        let (status, _) = app.post("/api/agents/Scout/backup", json!({ "path": "" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
