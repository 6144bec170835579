//! Google Drive multipart upload target.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{BridgeError, DeployTarget, UploadScope};
use crate::db::DeployTargetKind;

pub const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com";

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
}

pub struct DriveTarget {
    client: Client,
    upload_base: String,
    access_token: String,
    folder_id: Option<String>,
}

impl DriveTarget {
    pub fn new(access_token: impl Into<String>, folder_id: Option<String>) -> Self {
        Self::with_upload_base(DRIVE_UPLOAD_BASE, access_token, folder_id)
    }

    pub fn with_upload_base(
        upload_base: &str,
        access_token: impl Into<String>,
        folder_id: Option<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            upload_base: upload_base.trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            folder_id,
        }
    }

    fn metadata(&self, name: &str) -> serde_json::Value {
        let mut metadata = serde_json::json!({ "name": name });
        if let Some(folder) = &self.folder_id {
            metadata["parents"] = serde_json::json!([folder]);
        }
        metadata
    }
}

#[async_trait]
impl DeployTarget for DriveTarget {
    fn kind(&self) -> DeployTargetKind {
        DeployTargetKind::Gdrive
    }

    async fn upload(
        &self,
        name: &str,
        bytes: &[u8],
        scope: UploadScope<'_>,
    ) -> Result<String, BridgeError> {
        let file_name = match scope {
            UploadScope::Artifact => name.to_string(),
            UploadScope::Backup { agent } => format!("{}-{}", agent, name),
        };

        let boundary = format!("agent_panel_{}", chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0));
        let body = multipart_related(&boundary, &self.metadata(&file_name), bytes);

        let resp = self
            .client
            .post(format!(
                "{}/upload/drive/v3/files?uploadType=multipart",
                self.upload_base
            ))
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header(
                "Content-Type",
                format!("multipart/related; boundary={}", boundary),
            )
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BridgeError::Api {
                service: "Google Drive",
                status: status.as_u16(),
                body,
            });
        }

        let file: DriveFile = resp.json().await?;
        tracing::info!("Uploaded {} to Google Drive as {}", file_name, file.id);
        Ok(file.id)
    }
}

/// Metadata part followed by the raw file part.
fn multipart_related(boundary: &str, metadata: &serde_json::Value, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(bytes.len() + 256);
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Type: application/octet-stream\r\n\r\n").as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}
