//! GitHub contents API target.

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use tokio::sync::OnceCell;

use super::{BridgeError, DeployTarget, UploadScope};
use crate::db::DeployTargetKind;

pub const GITHUB_API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("agent-panel/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct GitHubUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ExistingFile {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PutContentsResponse {
    content: PutContentsFile,
}

#[derive(Debug, Deserialize)]
struct PutContentsFile {
    html_url: String,
}

/// Pushes files into a GitHub repository with a personal access token.
pub struct GitHubTarget {
    client: Client,
    api_base: String,
    token: String,
    /// Default repository for artifacts: `owner/name` or a bare `name`
    /// owned by the authenticated user.
    repo: Option<String>,
    login: OnceCell<String>,
}

impl GitHubTarget {
    pub fn new(token: impl Into<String>, repo: Option<String>) -> Self {
        Self::with_api_base(GITHUB_API_BASE, token, repo)
    }

    pub fn with_api_base(api_base: &str, token: impl Into<String>, repo: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.into(),
            repo,
            login: OnceCell::new(),
        }
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT)
    }

    /// Login of the token's owner, fetched once.
    async fn login(&self) -> Result<&str, BridgeError> {
        let login = self
            .login
            .get_or_try_init(|| async {
                let resp = self
                    .request(self.client.get(format!("{}/user", self.api_base)))
                    .send()
                    .await?;
                let user: GitHubUser = check(resp).await?.json().await?;
                tracing::debug!(login = %user.login, "Resolved GitHub user");
                Ok::<_, BridgeError>(user.login)
            })
            .await?;
        Ok(login.as_str())
    }

    /// Resolve the `(owner, repo)` pair for an upload.
    async fn destination(&self, scope: &UploadScope<'_>) -> Result<(String, String), BridgeError> {
        let repo = match scope {
            UploadScope::Artifact => self
                .repo
                .clone()
                .ok_or(BridgeError::NotConfigured("GITHUB_REPO"))?,
            UploadScope::Backup { agent } => backup_repo_name(agent),
        };

        match repo.split_once('/') {
            Some((owner, name)) => Ok((owner.to_string(), name.to_string())),
            None => Ok((self.login().await?.to_string(), repo)),
        }
    }

    async fn ensure_repo(&self, owner: &str, repo: &str) -> Result<(), BridgeError> {
        let resp = self
            .request(
                self.client
                    .get(format!("{}/repos/{}/{}", self.api_base, owner, repo)),
            )
            .send()
            .await?;
        if resp.status() != StatusCode::NOT_FOUND {
            check(resp).await?;
            return Ok(());
        }

        // Repositories for another owner can only be created under an organization.
        let create_url = if owner == self.login().await? {
            format!("{}/user/repos", self.api_base)
        } else {
            format!("{}/orgs/{}/repos", self.api_base, owner)
        };
        tracing::info!("Creating GitHub repository {}/{}", owner, repo);
        let resp = self
            .request(self.client.post(create_url))
            .json(&serde_json::json!({ "name": repo, "private": true }))
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn existing_sha(&self, contents_url: &str) -> Result<Option<String>, BridgeError> {
        let resp = self.request(self.client.get(contents_url)).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let file: ExistingFile = check(resp).await?.json().await?;
        Ok(Some(file.sha))
    }
}

#[async_trait]
impl DeployTarget for GitHubTarget {
    fn kind(&self) -> DeployTargetKind {
        DeployTargetKind::Github
    }

    async fn upload(
        &self,
        name: &str,
        bytes: &[u8],
        scope: UploadScope<'_>,
    ) -> Result<String, BridgeError> {
        let (owner, repo) = self.destination(&scope).await?;
        self.ensure_repo(&owner, &repo).await?;

        let contents_url = format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_base,
            owner,
            repo,
            encode_path(name)
        );
        let sha = self.existing_sha(&contents_url).await?;

        let mut body = serde_json::json!({
            "message": format!("Upload {}", name),
            "content": base64::engine::general_purpose::STANDARD.encode(bytes),
        });
        if let Some(sha) = sha {
            body["sha"] = serde_json::Value::String(sha);
        }

        let resp = self
            .request(self.client.put(&contents_url))
            .json(&body)
            .send()
            .await?;
        let put: PutContentsResponse = check(resp).await?.json().await?;
        tracing::info!("Uploaded {} to GitHub repository {}/{}", name, owner, repo);
        Ok(put.content.html_url)
    }
}

pub fn backup_repo_name(agent: &str) -> String {
    format!("agent-{}-backup", agent)
}

/// Percent-encode each path segment, keeping the separators.
fn encode_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, BridgeError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(BridgeError::Api {
        service: "GitHub",
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::StatusCode as HttpStatus;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct MockGitHub {
        repos: HashSet<String>,
        files: HashMap<String, serde_json::Value>,
        created: Vec<String>,
        org_created: Vec<String>,
    }

    type Shared = Arc<Mutex<MockGitHub>>;

    async fn user() -> Json<serde_json::Value> {
        Json(serde_json::json!({ "login": "octo" }))
    }

    async fn get_repo(
        State(state): State<Shared>,
        Path((owner, repo)): Path<(String, String)>,
    ) -> HttpStatus {
        if state.lock().unwrap().repos.contains(&format!("{}/{}", owner, repo)) {
            HttpStatus::OK
        } else {
            HttpStatus::NOT_FOUND
        }
    }

    async fn create_repo(
        State(state): State<Shared>,
        Json(body): Json<serde_json::Value>,
    ) -> HttpStatus {
        let name = body["name"].as_str().unwrap().to_string();
        let mut state = state.lock().unwrap();
        state.repos.insert(format!("octo/{}", name));
        state.created.push(name);
        HttpStatus::CREATED
    }

    async fn create_org_repo(
        State(state): State<Shared>,
        Path(org): Path<String>,
        Json(body): Json<serde_json::Value>,
    ) -> HttpStatus {
        let repo = format!("{}/{}", org, body["name"].as_str().unwrap());
        let mut state = state.lock().unwrap();
        state.repos.insert(repo.clone());
        state.org_created.push(repo);
        HttpStatus::CREATED
    }

    async fn get_file(
        State(state): State<Shared>,
        Path((owner, repo, path)): Path<(String, String, String)>,
    ) -> Result<Json<serde_json::Value>, HttpStatus> {
        let key = format!("{}/{}/{}", owner, repo, path);
        match state.lock().unwrap().files.get(&key) {
            Some(_) => Ok(Json(serde_json::json!({ "sha": format!("sha-{}", path) }))),
            None => Err(HttpStatus::NOT_FOUND),
        }
    }

    async fn put_file(
        State(state): State<Shared>,
        Path((owner, repo, path)): Path<(String, String, String)>,
        Json(body): Json<serde_json::Value>,
    ) -> Json<serde_json::Value> {
        let key = format!("{}/{}/{}", owner, repo, path);
        state.lock().unwrap().files.insert(key, body);
        Json(serde_json::json!({
            "content": { "html_url": format!("https://github.test/{}/{}/blob/main/{}", owner, repo, path) }
        }))
    }

    async fn spawn_mock(state: Shared) -> String {
        let app = Router::new()
            .route("/user", get(user))
            .route("/user/repos", post(create_repo))
            .route("/orgs/:org/repos", post(create_org_repo))
            .route("/repos/:owner/:repo", get(get_repo))
            .route(
                "/repos/:owner/:repo/contents/*path",
                get(get_file).put(put_file),
            )
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_upload_creates_repo_then_updates_with_sha() {
        let state = Shared::default();
        let base = spawn_mock(state.clone()).await;
        let target = GitHubTarget::with_api_base(&base, "token", Some("snippets".to_string()));

        let url = target
            .upload("src/main.rs", b"fn main() {}", UploadScope::Artifact)
            .await
            .unwrap();
        assert_eq!(url, "https://github.test/octo/snippets/blob/main/src/main.rs");

        target
            .upload("src/main.rs", b"fn main() { run(); }", UploadScope::Artifact)
            .await
            .unwrap();

        let state = state.lock().unwrap();
        assert_eq!(state.created, vec!["snippets".to_string()]);
        let body = &state.files["octo/snippets/src/main.rs"];
        assert_eq!(body["sha"], "sha-src/main.rs");
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(body["content"].as_str().unwrap())
            .unwrap();
        assert_eq!(decoded, b"fn main() { run(); }");
    }

    #[tokio::test]
    async fn test_missing_org_repo_is_created_under_org() {
        let state = Shared::default();
        let base = spawn_mock(state.clone()).await;
        let target = GitHubTarget::with_api_base(&base, "token", Some("acme/snippets".to_string()));

        let url = target
            .upload("lib.rs", b"pub fn f() {}", UploadScope::Artifact)
            .await
            .unwrap();
        assert_eq!(url, "https://github.test/acme/snippets/blob/main/lib.rs");

        let state = state.lock().unwrap();
        assert_eq!(state.org_created, vec!["acme/snippets".to_string()]);
        assert!(state.created.is_empty());
    }

    #[tokio::test]
    async fn test_backup_goes_to_agent_repo() {
        let state = Shared::default();
        let base = spawn_mock(state.clone()).await;
        let target = GitHubTarget::with_api_base(&base, "token", None);

        target
            .upload("data.json", b"{}", UploadScope::Backup { agent: "Scout" })
            .await
            .unwrap();
        assert!(state
            .lock()
            .unwrap()
            .files
            .contains_key("octo/agent-Scout-backup/data.json"));

        let err = target
            .upload("x.rs", b"", UploadScope::Artifact)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_api_error_is_surfaced() {
        let app = Router::new().route("/user", get(|| async { HttpStatus::UNAUTHORIZED }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let target = GitHubTarget::with_api_base(&base, "bad", Some("repo".to_string()));
        let err = target
            .upload("a.rs", b"", UploadScope::Artifact)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Api { status: 401, .. }));
    }

    #[test]
    fn test_encode_path_keeps_separators() {
        assert_eq!(encode_path("dir/my file.rs"), "dir/my%20file.rs");
        assert_eq!(encode_path("/a//b"), "a/b");
    }
}
