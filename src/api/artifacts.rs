//! Code artifact, deployment and workspace folder endpoints.

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::bridge::BridgeError;
use crate::db::{
    CodeArtifact, DeployTargetKind, DeploymentRecord, NewCodeArtifact, StoreError,
    WorkspaceFolder,
};

use super::routes::{blocking, store_error, ApiError, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_artifacts).post(create_artifact))
        .route("/:id", get(get_artifact).put(edit_artifact))
        .route("/:id/deploy", post(deploy_artifact))
        .route("/:id/deployments", get(list_deployments))
}

pub fn folder_routes() -> Router<Arc<AppState>> {
    Router::new().route("/", get(list_folders).post(create_folder))
}

// ─────────────────────────────────────────────────────────────────────────────
// Request Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ArtifactFilter {
    pub agent: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EditArtifactRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct DeployRequest {
    pub target: DeployTargetKind,
}

#[derive(Debug, Deserialize)]
pub struct CreateFolderRequest {
    pub folder_name: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET /api/artifacts?agent=NAME
async fn list_artifacts(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ArtifactFilter>,
) -> Result<Json<Vec<CodeArtifact>>, ApiError> {
    blocking(&state, move |state| state.store.artifacts(filter.agent.as_deref()))
        .await?
        .map(Json)
        .map_err(store_error)
}

/// POST /api/artifacts - Store a crawled artifact.
async fn create_artifact(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewCodeArtifact>,
) -> Result<Json<CodeArtifact>, ApiError> {
    if req.filename.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Filename cannot be empty".to_string(),
        ));
    }

    let artifact = blocking(&state, move |state| state.store.insert_artifact(&req))
        .await?
        .map_err(store_error)?;
    tracing::info!("Stored artifact {} ({})", artifact.filename, artifact.id);
    Ok(Json(artifact))
}

/// GET /api/artifacts/:id
async fn get_artifact(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<i64>,
) -> Result<Json<CodeArtifact>, ApiError> {
    blocking(&state, move |state| state.store.artifact(id))
        .await?
        .map_err(store_error)?
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Artifact {} not found", id)))
}

/// PUT /api/artifacts/:id - Replace content; status becomes `edited`.
async fn edit_artifact(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<i64>,
    Json(req): Json<EditArtifactRequest>,
) -> Result<Json<CodeArtifact>, ApiError> {
    blocking(&state, move |state| state.store.edit_artifact(id, &req.content))
        .await?
        .map(Json)
        .map_err(store_error)
}

/// POST /api/artifacts/:id/deploy - Upload to one target and log the attempt.
///
/// A failed upload still answers 200 with the failed deployment record.
async fn deploy_artifact(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<i64>,
    Json(req): Json<DeployRequest>,
) -> Result<Json<DeploymentRecord>, ApiError> {
    match state.bridge.deploy_artifact(id, req.target).await {
        Ok(record) => Ok(Json(record)),
        Err(BridgeError::Store(e)) => Err(store_error(e)),
        Err(e) => {
            tracing::error!("Error deploying artifact {}: {}", id, e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

/// GET /api/artifacts/:id/deployments - Deployment log, oldest first.
async fn list_deployments(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<i64>,
) -> Result<Json<Vec<DeploymentRecord>>, ApiError> {
    blocking(&state, move |state| {
        if state.store.artifact(id)?.is_none() {
            return Err(StoreError::NotFound(format!("Artifact {}", id)));
        }
        state.store.deployments(id)
    })
    .await?
    .map(Json)
    .map_err(store_error)
}

/// GET /api/folders
async fn list_folders(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<WorkspaceFolder>>, ApiError> {
    blocking(&state, |state| state.store.workspace_folders())
        .await?
        .map(Json)
        .map_err(store_error)
}

/// POST /api/folders - Folder names are unique.
async fn create_folder(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateFolderRequest>,
) -> Result<Json<WorkspaceFolder>, ApiError> {
    let name = req.folder_name.trim().to_string();
    if name.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Folder name cannot be empty".to_string(),
        ));
    }

    blocking(&state, move |state| state.store.create_workspace_folder(&name))
        .await?
        .map(Json)
        .map_err(store_error)
}

#[cfg(test)]
mod tests {
    use crate::api::routes::test_support::TestApp;
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    async fn create(app: &TestApp) -> i64 {
        let (status, artifact) = app
            .post(
                "/api/artifacts",
                json!({
                    "filename": "spider.py",
                    "content": "print('crawl')",
                    "language": "python",
                    "agent_name": "Scout"
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", artifact);
        assert_eq!(artifact["status"], "crawled");
        artifact["id"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn test_artifact_edit_flow() {
        let app = TestApp::new();
        let id = create(&app).await;

        let (status, edited) = app
            .request(
                Method::PUT,
                &format!("/api/artifacts/{}", id),
                Some(json!({ "content": "print('edited')" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(edited["status"], "edited");

        let (_, fetched) = app.get(&format!("/api/artifacts/{}", id)).await;
        assert_eq!(fetched["content"], "print('edited')");

        let (_, list) = app.get("/api/artifacts?agent=Scout").await;
        assert_eq!(list.as_array().unwrap().len(), 1);

        let (status, _) = app.get("/api/artifacts/77").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = app
            .request(Method::PUT, "/api/artifacts/77", Some(json!({ "content": "" })))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_deploy_without_target_logs_failure() {
        let app = TestApp::new();
        let id = create(&app).await;

        let (status, record) = app
            .post(&format!("/api/artifacts/{}/deploy", id), json!({ "target": "github" }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(record["status"], "failed");

        let (_, log) = app.get(&format!("/api/artifacts/{}/deployments", id)).await;
        assert_eq!(log.as_array().unwrap().len(), 1);

        let (status, _) = app
            .post("/api/artifacts/500/deploy", json!({ "target": "gdrive" }))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = app.get("/api/artifacts/500/deployments").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_folders_are_unique() {
        let app = TestApp::new();
        let (status, _) = app.post("/api/folders", json!({ "folder_name": "drafts" })).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = app.post("/api/folders", json!({ "folder_name": "drafts" })).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (status, _) = app.post("/api/folders", json!({ "folder_name": "  " })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, folders) = app.get("/api/folders").await;
        assert_eq!(folders[0]["folder_name"], "drafts");
    }
}
