//! Storage and deployment bridge.
//!
//! Pushes code artifacts and agent data files to external services:
//! - GitHub, through the repository contents API
//! - Google Drive, through the multipart upload API
//!
//! Every attempt on an artifact is appended to the deployment log, whether
//! it succeeded or not. There are no retries.

mod drive;
mod github;

pub use drive::DriveTarget;
pub use github::{backup_repo_name, GitHubTarget};

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::Config;
use crate::db::{
    ArtifactStatus, DeployTargetKind, DeploymentRecord, DeploymentStatus, Store, StoreError,
    StoreResult,
};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} API error {status}: {body}")]
    Api {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing configuration: {0}")]
    NotConfigured(&'static str),

    #[error("No {0} target configured")]
    NoTarget(DeployTargetKind),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Background task failed: {0}")]
    Task(String),
}

/// Where an upload lands within a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadScope<'a> {
    /// The target's configured artifact location.
    Artifact,
    /// A per-agent backup location.
    Backup { agent: &'a str },
}

/// An external service that accepts file uploads.
#[async_trait]
pub trait DeployTarget: Send + Sync {
    fn kind(&self) -> DeployTargetKind;

    /// Upload one file. Returns a remote reference (URL or file id).
    async fn upload(
        &self,
        name: &str,
        bytes: &[u8],
        scope: UploadScope<'_>,
    ) -> Result<String, BridgeError>;
}

pub struct DeploymentBridge {
    store: Store,
    targets: BTreeMap<DeployTargetKind, Arc<dyn DeployTarget>>,
}

impl DeploymentBridge {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            targets: BTreeMap::new(),
        }
    }

    /// Bridge with every target that has credentials in `config`.
    pub fn from_config(store: Store, config: &Config) -> Self {
        let mut bridge = Self::new(store);
        if let Some(token) = &config.github.token {
            bridge = bridge.with_target(GitHubTarget::new(token.clone(), config.github.repo.clone()));
        }
        if let Some(token) = &config.gdrive.access_token {
            bridge = bridge.with_target(DriveTarget::new(token.clone(), config.gdrive.folder_id.clone()));
        }
        if bridge.targets.is_empty() {
            tracing::info!("No deployment targets configured");
        }
        bridge
    }

    /// Register a target, replacing any existing target of the same kind.
    pub fn with_target(mut self, target: impl DeployTarget + 'static) -> Self {
        self.targets.insert(target.kind(), Arc::new(target));
        self
    }

    pub fn target_kinds(&self) -> Vec<DeployTargetKind> {
        self.targets.keys().copied().collect()
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, BridgeError>
    where
        T: Send + 'static,
        F: FnOnce(&Store) -> StoreResult<T> + Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| BridgeError::Task(e.to_string()))?
            .map_err(BridgeError::from)
    }

    /// Upload one artifact and log the attempt.
    ///
    /// Upload failures are recorded as failed deployments and returned as
    /// `Ok`; `Err` means the attempt could not be recorded at all.
    pub async fn deploy_artifact(
        &self,
        artifact_id: i64,
        kind: DeployTargetKind,
    ) -> Result<DeploymentRecord, BridgeError> {
        let artifact = self
            .blocking(move |store| store.artifact(artifact_id))
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("Artifact {}", artifact_id)))?;

        let outcome = match self.targets.get(&kind) {
            Some(target) => {
                target
                    .upload(&artifact.filename, &artifact.payload(), UploadScope::Artifact)
                    .await
            }
            None => Err(BridgeError::NoTarget(kind)),
        };

        let (status, message) = match outcome {
            Ok(reference) => {
                tracing::info!("Deployed {} to {}: {}", artifact.filename, kind, reference);
                (DeploymentStatus::Success, reference)
            }
            Err(e) => {
                tracing::error!("Error deploying {} to {}: {}", artifact.filename, kind, e);
                (DeploymentStatus::Failed, e.to_string())
            }
        };

        self.blocking(move |store| {
            let id = store.record_deployment(artifact_id, kind, status, Some(message.as_str()))?;
            if status == DeploymentStatus::Success {
                store.set_artifact_status(artifact_id, ArtifactStatus::Deployed)?;
            }
            store
                .deployments(artifact_id)?
                .into_iter()
                .find(|record| record.id == id)
                .ok_or_else(|| StoreError::NotFound(format!("Deployment {}", id)))
        })
        .await
    }

    /// Deploy an artifact. Returns `true` only when the upload succeeded.
    pub async fn deploy(&self, artifact_id: i64, kind: DeployTargetKind) -> bool {
        match self.deploy_artifact(artifact_id, kind).await {
            Ok(record) => record.status == DeploymentStatus::Success,
            Err(e) => {
                tracing::error!("Error deploying artifact {}: {}", artifact_id, e);
                false
            }
        }
    }

    /// Upload a local file to every configured target as a backup of one
    /// agent's data. Returns `true` if at least one target is configured and
    /// every upload succeeded.
    pub async fn backup_agent_data(&self, agent_name: &str, path: &Path) -> bool {
        if self.targets.is_empty() {
            tracing::warn!("No deployment targets configured for backup");
            return false;
        }

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("Error reading backup file {}: {}", path.display(), e);
                return false;
            }
        };
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "backup".to_string());

        let mut all_ok = true;
        for target in self.targets.values() {
            let scope = UploadScope::Backup { agent: agent_name };
            match target.upload(&name, &bytes, scope).await {
                Ok(reference) => {
                    tracing::info!(agent = agent_name, destination = %target.kind(), "Backed up {}: {}", name, reference)
                }
                Err(e) => {
                    tracing::error!("Error backing up {} to {}: {}", agent_name, target.kind(), e);
                    all_ok = false;
                }
            }
        }
        all_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::temp_store;
    use crate::db::NewCodeArtifact;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Calls(Mutex<Vec<(String, Vec<u8>, Option<String>)>>);

    struct FakeTarget {
        kind: DeployTargetKind,
        fail: bool,
        calls: Arc<Calls>,
    }

    #[async_trait]
    impl DeployTarget for FakeTarget {
        fn kind(&self) -> DeployTargetKind {
            self.kind
        }

        async fn upload(
            &self,
            name: &str,
            bytes: &[u8],
            scope: UploadScope<'_>,
        ) -> Result<String, BridgeError> {
            let agent = match scope {
                UploadScope::Artifact => None,
                UploadScope::Backup { agent } => Some(agent.to_string()),
            };
            self.calls
                .0
                .lock()
                .unwrap()
                .push((name.to_string(), bytes.to_vec(), agent));
            if self.fail {
                Err(BridgeError::Api {
                    service: "fake",
                    status: 500,
                    body: "boom".to_string(),
                })
            } else {
                Ok(format!("fake://{}", name))
            }
        }
    }

    fn fake(kind: DeployTargetKind, fail: bool) -> (FakeTarget, Arc<Calls>) {
        let calls = Arc::new(Calls::default());
        (
            FakeTarget {
                kind,
                fail,
                calls: calls.clone(),
            },
            calls,
        )
    }

    fn artifact(store: &Store) -> i64 {
        store
            .insert_artifact(&NewCodeArtifact {
                filename: "worker.rs".to_string(),
                content: "fn work() {}".to_string(),
                language: "rust".to_string(),
                agent_name: "Editor".to_string(),
                binary_content: None,
            })
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_successful_deploy_marks_artifact_deployed() {
        let (_dir, store) = temp_store();
        let id = artifact(&store);
        let (target, calls) = fake(DeployTargetKind::Github, false);
        let bridge = DeploymentBridge::new(store.clone()).with_target(target);

        assert!(bridge.deploy(id, DeployTargetKind::Github).await);

        let calls = calls.0.lock().unwrap();
        assert_eq!(calls[0].0, "worker.rs");
        assert_eq!(calls[0].1, b"fn work() {}");
        assert_eq!(
            store.artifact(id).unwrap().unwrap().status,
            ArtifactStatus::Deployed
        );
        let log = store.deployments(id).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].status, DeploymentStatus::Success);
        assert_eq!(log[0].message.as_deref(), Some("fake://worker.rs"));
    }

    #[tokio::test]
    async fn test_failed_deploy_is_logged_and_status_kept() {
        let (_dir, store) = temp_store();
        let id = artifact(&store);
        let (target, _calls) = fake(DeployTargetKind::Gdrive, true);
        let bridge = DeploymentBridge::new(store.clone()).with_target(target);

        let record = bridge
            .deploy_artifact(id, DeployTargetKind::Gdrive)
            .await
            .unwrap();
        assert_eq!(record.status, DeploymentStatus::Failed);
        assert!(record.message.unwrap().contains("boom"));
        assert_eq!(
            store.artifact(id).unwrap().unwrap().status,
            ArtifactStatus::Crawled
        );

        // No GitHub target registered: the attempt is still logged.
        assert!(!bridge.deploy(id, DeployTargetKind::Github).await);
        assert_eq!(store.deployments(id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_deploy_missing_artifact() {
        let (_dir, store) = temp_store();
        let (target, calls) = fake(DeployTargetKind::Github, false);
        let bridge = DeploymentBridge::new(store).with_target(target);

        assert!(!bridge.deploy(42, DeployTargetKind::Github).await);
        assert!(calls.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_backup_uploads_to_every_target() {
        let (dir, store) = temp_store();
        let path = dir.path().join("scout.json");
        std::fs::write(&path, b"{\"pages\":3}").unwrap();

        let (github, github_calls) = fake(DeployTargetKind::Github, false);
        let (drive, drive_calls) = fake(DeployTargetKind::Gdrive, true);
        let bridge = DeploymentBridge::new(store.clone())
            .with_target(github)
            .with_target(drive);

        assert!(!bridge.backup_agent_data("Scout", &path).await);
        let github_calls = github_calls.0.lock().unwrap();
        assert_eq!(github_calls[0].0, "scout.json");
        assert_eq!(github_calls[0].2.as_deref(), Some("Scout"));
        assert_eq!(drive_calls.0.lock().unwrap().len(), 1);

        let empty = DeploymentBridge::new(store);
        assert!(!empty.backup_agent_data("Scout", &path).await);
    }

    #[tokio::test]
    async fn test_backup_missing_file() {
        let (dir, store) = temp_store();
        let (target, calls) = fake(DeployTargetKind::Github, false);
        let bridge = DeploymentBridge::new(store).with_target(target);

        assert!(!bridge.backup_agent_data("Scout", &dir.path().join("nope")).await);
        assert!(calls.0.lock().unwrap().is_empty());
    }
}
