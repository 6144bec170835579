//! Router assembly, shared state and server lifecycle.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::agents::AgentManager;
use crate::bridge::DeploymentBridge;
use crate::config::Config;
use crate::db::{DeployTargetKind, Store, StoreError};
use crate::monitor::SystemMonitor;
use crate::scheduler::TaskScheduler;

use super::agents as agents_api;
use super::artifacts as artifacts_api;
use super::schedules as schedules_api;
use super::system as system_api;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: Store,
    /// Collective worker process and per-agent status
    pub agents: AgentManager,
    /// Background due-task sweeper
    pub scheduler: TaskScheduler,
    pub monitor: SystemMonitor,
    /// GitHub / Google Drive uploads
    pub bridge: DeploymentBridge,
}

impl AppState {
    pub fn new(config: Config, store: Store) -> Self {
        let agents = AgentManager::new(
            config.agent_command.clone(),
            config.agent_names.clone(),
            config.agent_stop_timeout,
            store.clone(),
        );
        let scheduler = TaskScheduler::new(
            store.clone(),
            config.scheduler_interval,
            config.agent_names.clone(),
        );
        let monitor = SystemMonitor::new(config.service_marker.clone(), config.service_command.clone())
            .with_retention(config.snapshot_retention);
        let bridge = DeploymentBridge::from_config(store.clone(), &config);

        Self {
            config,
            store,
            agents,
            scheduler,
            monitor,
            bridge,
        }
    }
}

/// Build the full API router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .nest("/api/system", system_api::routes())
        .nest("/api/agents", agents_api::routes())
        .nest("/api/actions", agents_api::action_routes())
        .nest("/api/schedules", schedules_api::routes())
        .nest("/api/executions", schedules_api::execution_routes())
        .nest("/api/artifacts", artifacts_api::routes())
        .nest("/api/folders", artifacts_api::folder_routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the scheduler and serve the API until a shutdown signal arrives.
pub async fn serve(state: Arc<AppState>) -> anyhow::Result<()> {
    state.scheduler.start();

    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app(Arc::clone(&state)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tokio::task::spawn_blocking(move || {
        state.scheduler.stop();
        state.agents.stop();
    })
    .await?;
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Resolve on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping scheduler and agents...");
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared handler helpers
// ─────────────────────────────────────────────────────────────────────────────

pub(super) type ApiError = (StatusCode, String);

/// Run blocking work (SQLite, process control, sampling) off the async runtime.
pub(super) async fn blocking<T, F>(state: &Arc<AppState>, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&AppState) -> T + Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || f(&state))
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Background task failed: {}", e),
            )
        })
}

pub(super) fn store_error(e: StoreError) -> ApiError {
    match e {
        StoreError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{} not found", what)),
        StoreError::Sqlite(rusqlite::Error::SqliteFailure(err, msg))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            (
                StatusCode::CONFLICT,
                msg.unwrap_or_else(|| "Constraint violation".to_string()),
            )
        }
        other => {
            tracing::error!("Store error: {}", other);
            (StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    scheduler_running: bool,
    agents_running: bool,
    /// Targets that have upload credentials
    deploy_targets: Vec<DeployTargetKind>,
    /// Providers with an OAuth client id/secret pair configured
    oauth_clients: Vec<DeployTargetKind>,
}

/// GET /api/health
async fn health(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, ApiError> {
    blocking(&state, |state| {
        let mut oauth_clients = Vec::new();
        if state.config.github.oauth.is_some() {
            oauth_clients.push(DeployTargetKind::Github);
        }
        if state.config.gdrive.oauth.is_some() {
            oauth_clients.push(DeployTargetKind::Gdrive);
        }
        Json(HealthResponse {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            scheduler_running: state.scheduler.is_running(),
            agents_running: state.agents.is_running(),
            deploy_targets: state.bridge.target_kinds(),
            oauth_clients,
        })
    })
    .await
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    pub struct TestApp {
        pub state: Arc<AppState>,
        pub dir: TempDir,
    }

    impl TestApp {
        pub fn new() -> Self {
            Self::with_agent_command("true", &[])
        }

        pub fn with_agent_command(program: &str, args: &[&str]) -> Self {
            Self::build(program, args, |_| {})
        }

        /// Adjust the state (targets, monitor) before it is shared.
        pub fn with_state(customize: impl FnOnce(&mut AppState)) -> Self {
            Self::build("true", &[], customize)
        }

        fn build(program: &str, args: &[&str], customize: impl FnOnce(&mut AppState)) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mut config = Config::from_lookup(|_| None).unwrap();
            config.database_path = dir.path().join("panel.db");
            config.agent_command = crate::config::AgentCommand::new(
                program,
                args.iter().map(|a| a.to_string()).collect(),
            );
            config.agent_names = vec!["Scout".to_string(), "Editor".to_string()];

            let store = Store::open(&config.database_path).unwrap();
            let mut state = AppState::new(config, store);
            state.monitor = SystemMonitor::new("ollama", "true")
                .with_cpu_window(Duration::from_millis(100))
                .with_restart_delay(Duration::ZERO);
            customize(&mut state);
            Self {
                state: Arc::new(state),
                dir,
            }
        }

        /// Send one request and return the status plus the JSON body
        /// (`Null` for an empty or non-JSON body).
        pub async fn request(
            &self,
            method: Method,
            uri: &str,
            body: Option<serde_json::Value>,
        ) -> (StatusCode, serde_json::Value) {
            let mut builder = Request::builder().method(method).uri(uri);
            let body = match body {
                Some(json) => {
                    builder = builder.header("content-type", "application/json");
                    Body::from(json.to_string())
                }
                None => Body::empty(),
            };
            let response = app(Arc::clone(&self.state))
                .oneshot(builder.body(body).unwrap())
                .await
                .unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
            (status, json)
        }

        pub async fn get(&self, uri: &str) -> (StatusCode, serde_json::Value) {
            self.request(Method::GET, uri, None).await
        }

        pub async fn post(&self, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
            self.request(Method::POST, uri, Some(body)).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::TestApp;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_health() {
        let app = TestApp::new();
        let (status, body) = app.get("/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["scheduler_running"], false);
        assert_eq!(body["agents_running"], false);
        assert_eq!(body["deploy_targets"], serde_json::json!([]));
        assert_eq!(body["oauth_clients"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_health_lists_configured_integrations() {
        let app = TestApp::with_state(|state| {
            state.config.gdrive.oauth = Some(crate::config::OAuthClient {
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
            });
            state.bridge = crate::bridge::DeploymentBridge::new(state.store.clone())
                .with_target(crate::bridge::GitHubTarget::new("token", None));
        });
        let (_, body) = app.get("/api/health").await;
        assert_eq!(body["deploy_targets"], serde_json::json!(["github"]));
        assert_eq!(body["oauth_clients"], serde_json::json!(["gdrive"]));
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let app = TestApp::new();
        let (status, _) = app.get("/api/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
