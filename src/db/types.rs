//! Row types for the persistent store.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scheduler::ScheduleKind;

/// A stored string did not name a known variant.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Agents
// ─────────────────────────────────────────────────────────────────────────────

/// Persisted status of one named agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentStatus {
    pub agent_name: String,
    pub running: bool,
    pub current_task: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
    /// False when no status row has ever been written for this agent.
    pub initialized: bool,
}

impl AgentStatus {
    /// Status reported for an agent that has no row yet.
    pub fn not_initialized(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            running: false,
            current_task: None,
            last_updated: None,
            initialized: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Task execution log
// ─────────────────────────────────────────────────────────────────────────────

/// Status of an execution record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(ParseEnumError::new("execution status", other)),
        }
    }
}

/// One entry of the append-only execution log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskExecutionRecord {
    pub id: i64,
    pub agent_name: String,
    pub task_type: String,
    pub status: ExecutionStatus,
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Scheduled tasks
// ─────────────────────────────────────────────────────────────────────────────

/// Opaque parameters attached to a scheduled task. Never interpreted by the scheduler.
pub type TaskParameters = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledTask {
    pub id: i64,
    pub agent_name: String,
    pub task_name: String,
    pub task_description: String,
    pub schedule_kind: ScheduleKind,
    pub schedule_time: DateTime<Utc>,
    pub parameters: TaskParameters,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
}

/// Input for creating a scheduled task.
#[derive(Debug, Clone, Deserialize)]
pub struct NewScheduledTask {
    pub agent_name: String,
    pub task_name: String,
    #[serde(default)]
    pub task_description: String,
    pub schedule_kind: ScheduleKind,
    /// First run; becomes the initial `next_run`.
    pub schedule_time: DateTime<Utc>,
    #[serde(default)]
    pub parameters: TaskParameters,
}

// ─────────────────────────────────────────────────────────────────────────────
// System metrics
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemSnapshot {
    pub timestamp: DateTime<Utc>,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub service_running: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Code artifacts and deployments
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    Crawled,
    Edited,
    Deployed,
}

impl ArtifactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crawled => "crawled",
            Self::Edited => "edited",
            Self::Deployed => "deployed",
        }
    }
}

impl FromStr for ArtifactStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "crawled" => Ok(Self::Crawled),
            "edited" => Ok(Self::Edited),
            "deployed" => Ok(Self::Deployed),
            other => Err(ParseEnumError::new("artifact status", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeArtifact {
    pub id: i64,
    pub filename: String,
    pub content: String,
    pub language: String,
    pub agent_name: String,
    pub status: ArtifactStatus,
    #[serde(skip)]
    pub binary_content: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CodeArtifact {
    /// Bytes to upload: the binary payload when present, the text content otherwise.
    pub fn payload(&self) -> Vec<u8> {
        match &self.binary_content {
            Some(bytes) => bytes.clone(),
            None => self.content.as_bytes().to_vec(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewCodeArtifact {
    pub filename: String,
    pub content: String,
    pub language: String,
    pub agent_name: String,
    #[serde(skip)]
    pub binary_content: Option<Vec<u8>>,
}

/// External service an artifact is deployed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployTargetKind {
    Github,
    Gdrive,
}

impl DeployTargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::Gdrive => "gdrive",
        }
    }
}

impl fmt::Display for DeployTargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeployTargetKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "github" => Ok(Self::Github),
            "gdrive" => Ok(Self::Gdrive),
            other => Err(ParseEnumError::new("deploy target", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Success,
    Failed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for DeploymentStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(ParseEnumError::new("deployment status", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeploymentRecord {
    pub id: i64,
    pub artifact_id: i64,
    pub target: DeployTargetKind,
    pub status: DeploymentStatus,
    pub message: Option<String>,
    pub deployed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkspaceFolder {
    pub id: i64,
    pub folder_name: String,
    pub created_at: DateTime<Utc>,
}
