//! Code artifacts, their deployment log, and workspace folders.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{
    encode_ts, enum_column, ts_column, ArtifactStatus, CodeArtifact, DeployTargetKind,
    DeploymentRecord, DeploymentStatus, NewCodeArtifact, Store, StoreError, StoreResult,
    WorkspaceFolder,
};

const ARTIFACT_COLUMNS: &str =
    "id, filename, content, language, agent_name, status, binary_content, created_at, updated_at";

fn artifact_from_row(row: &Row<'_>) -> rusqlite::Result<CodeArtifact> {
    Ok(CodeArtifact {
        id: row.get(0)?,
        filename: row.get(1)?,
        content: row.get(2)?,
        language: row.get(3)?,
        agent_name: row.get(4)?,
        status: enum_column(row, 5)?,
        binary_content: row.get(6)?,
        created_at: ts_column(row, 7)?,
        updated_at: ts_column(row, 8)?,
    })
}

impl Store {
    // ==================== Artifacts ====================

    /// Store a newly crawled artifact.
    pub fn insert_artifact(&self, artifact: &NewCodeArtifact) -> StoreResult<CodeArtifact> {
        let now = encode_ts(&Utc::now());
        let id = {
            let conn = self.connect()?;
            conn.execute(
                "INSERT INTO code_snippets (filename, content, language, agent_name, status,
                    binary_content, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    artifact.filename,
                    artifact.content,
                    artifact.language,
                    artifact.agent_name,
                    ArtifactStatus::Crawled.as_str(),
                    artifact.binary_content,
                    now,
                ],
            )?;
            conn.last_insert_rowid()
        };
        self.artifact(id)?
            .ok_or_else(|| StoreError::NotFound(format!("Artifact {}", id)))
    }

    pub fn artifact(&self, id: i64) -> StoreResult<Option<CodeArtifact>> {
        let conn = self.connect()?;
        let artifact = conn
            .query_row(
                &format!("SELECT {ARTIFACT_COLUMNS} FROM code_snippets WHERE id = ?1"),
                params![id],
                artifact_from_row,
            )
            .optional()?;
        Ok(artifact)
    }

    pub fn artifacts(&self, agent_name: Option<&str>) -> StoreResult<Vec<CodeArtifact>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ARTIFACT_COLUMNS} FROM code_snippets
             WHERE (?1 IS NULL OR agent_name = ?1)
             ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![agent_name], artifact_from_row)?;

        let mut artifacts = Vec::new();
        for row in rows {
            artifacts.push(row?);
        }
        Ok(artifacts)
    }

    /// Replace an artifact's content and mark it edited.
    pub fn edit_artifact(&self, id: i64, content: &str) -> StoreResult<CodeArtifact> {
        {
            let conn = self.connect()?;
            let updated = conn.execute(
                "UPDATE code_snippets SET content = ?1, status = ?2, updated_at = ?3 WHERE id = ?4",
                params![
                    content,
                    ArtifactStatus::Edited.as_str(),
                    encode_ts(&Utc::now()),
                    id
                ],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound(format!("Artifact {}", id)));
            }
        }
        self.artifact(id)?
            .ok_or_else(|| StoreError::NotFound(format!("Artifact {}", id)))
    }

    pub fn set_artifact_status(&self, id: i64, status: ArtifactStatus) -> StoreResult<()> {
        let conn = self.connect()?;
        let updated = conn.execute(
            "UPDATE code_snippets SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), encode_ts(&Utc::now()), id],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("Artifact {}", id)));
        }
        Ok(())
    }

    // ==================== Deployment log ====================

    pub fn record_deployment(
        &self,
        artifact_id: i64,
        target: DeployTargetKind,
        status: DeploymentStatus,
        message: Option<&str>,
    ) -> StoreResult<i64> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO deployment_logs (snippet_id, target, status, message, deployed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                artifact_id,
                target.as_str(),
                status.as_str(),
                message,
                encode_ts(&Utc::now())
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn deployments(&self, artifact_id: i64) -> StoreResult<Vec<DeploymentRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, snippet_id, target, status, message, deployed_at
             FROM deployment_logs WHERE snippet_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![artifact_id], |row| {
            Ok(DeploymentRecord {
                id: row.get(0)?,
                artifact_id: row.get(1)?,
                target: enum_column(row, 2)?,
                status: enum_column(row, 3)?,
                message: row.get(4)?,
                deployed_at: ts_column(row, 5)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    // ==================== Workspace folders ====================

    pub fn create_workspace_folder(&self, folder_name: &str) -> StoreResult<WorkspaceFolder> {
        let created_at: DateTime<Utc> = Utc::now();
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO workspace_folders (folder_name, created_at) VALUES (?1, ?2)",
            params![folder_name, encode_ts(&created_at)],
        )?;
        Ok(WorkspaceFolder {
            id: conn.last_insert_rowid(),
            folder_name: folder_name.to_string(),
            created_at,
        })
    }

    pub fn workspace_folders(&self) -> StoreResult<Vec<WorkspaceFolder>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT id, folder_name, created_at FROM workspace_folders ORDER BY folder_name")?;
        let rows = stmt.query_map([], |row| {
            Ok(WorkspaceFolder {
                id: row.get(0)?,
                folder_name: row.get(1)?,
                created_at: ts_column(row, 2)?,
            })
        })?;

        let mut folders = Vec::new();
        for row in rows {
            folders.push(row?);
        }
        Ok(folders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::temp_store;

    fn crawled(store: &Store) -> CodeArtifact {
        store
            .insert_artifact(&NewCodeArtifact {
                filename: "scraper.rs".to_string(),
                content: "fn main() {}".to_string(),
                language: "rust".to_string(),
                agent_name: "Scout".to_string(),
                binary_content: None,
            })
            .unwrap()
    }

    #[test]
    fn test_artifact_lifecycle() {
        let (_dir, store) = temp_store();
        let artifact = crawled(&store);
        assert_eq!(artifact.status, ArtifactStatus::Crawled);

        let edited = store.edit_artifact(artifact.id, "fn main() { run(); }").unwrap();
        assert_eq!(edited.status, ArtifactStatus::Edited);
        assert_eq!(edited.content, "fn main() { run(); }");
        assert!(edited.updated_at >= artifact.updated_at);

        store
            .set_artifact_status(artifact.id, ArtifactStatus::Deployed)
            .unwrap();
        assert_eq!(
            store.artifact(artifact.id).unwrap().unwrap().status,
            ArtifactStatus::Deployed
        );
        assert!(matches!(
            store.edit_artifact(404, "x"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_binary_payload_survives_storage() {
        let (_dir, store) = temp_store();
        let artifact = store
            .insert_artifact(&NewCodeArtifact {
                filename: "model.bin".to_string(),
                content: String::new(),
                language: "binary".to_string(),
                agent_name: "Uploader".to_string(),
                binary_content: Some(vec![0, 159, 146, 150]),
            })
            .unwrap();
        assert_eq!(artifact.payload(), vec![0, 159, 146, 150]);
        assert_eq!(store.artifacts(Some("Uploader")).unwrap().len(), 1);
        assert!(store.artifacts(Some("Scout")).unwrap().is_empty());
    }

    #[test]
    fn test_deployment_log_appends() {
        let (_dir, store) = temp_store();
        let artifact = crawled(&store);
        store
            .record_deployment(artifact.id, DeployTargetKind::Github, DeploymentStatus::Failed, Some("401"))
            .unwrap();
        store
            .record_deployment(artifact.id, DeployTargetKind::Gdrive, DeploymentStatus::Success, Some("file-1"))
            .unwrap();

        let log = store.deployments(artifact.id).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].target, DeployTargetKind::Github);
        assert_eq!(log[0].status, DeploymentStatus::Failed);
        assert_eq!(log[1].message.as_deref(), Some("file-1"));
    }

    #[test]
    fn test_workspace_folder_names_are_unique() {
        let (_dir, store) = temp_store();
        store.create_workspace_folder("scout-output").unwrap();
        assert!(store.create_workspace_folder("scout-output").is_err());
        assert_eq!(store.workspace_folders().unwrap().len(), 1);
    }
}
