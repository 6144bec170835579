//! Process configuration.
//!
//! All settings come from the process environment (a `.env` file is loaded by
//! the binary before this runs). Unset variables fall back to defaults that
//! match a single-host deployment:
//!
//! - `DATABASE_URL` - SQLite location (`sqlite://path`, `sqlite:path` or a bare path)
//! - `HOST` / `PORT` - HTTP bind address
//! - `AGENT_COMMAND` - worker command line, whitespace separated
//! - `AGENT_NAMES` - comma separated list of known agent names
//! - `AGENT_STOP_TIMEOUT_SECS` - how long `stop` waits for the worker to exit
//! - `SCHEDULER_POLL_SECS` - scheduler sweep interval
//! - `SERVICE_MARKER` / `SERVICE_COMMAND` - external service liveness marker and CLI
//! - `SNAPSHOT_RETENTION` - keep only the newest N system snapshots
//! - `GITHUB_CLIENT_ID` / `GITHUB_CLIENT_SECRET`, `GITHUB_TOKEN`, `GITHUB_REPO`
//! - `GDRIVE_CLIENT_ID` / `GDRIVE_CLIENT_SECRET`, `GDRIVE_ACCESS_TOKEN`, `GDRIVE_FOLDER_ID`

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_AGENT_NAMES: [&str; 5] = ["Scout", "Editor", "Uploader", "Clicker", "Transaction"];

const DEFAULT_DATABASE_PATH: &str = "agent_panel.db";
const DEFAULT_AGENT_COMMAND: &str = "./agent-worker";
const DEFAULT_SERVICE: &str = "ollama";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("Unsupported database URL (only sqlite is supported): {0}")]
    UnsupportedDatabase(String),

    #[error("{0} must not be empty")]
    Empty(&'static str),
}

/// Command line used to launch the collective worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl AgentCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split a whitespace separated command line. Returns `None` for a blank line.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }
}

/// OAuth application credentials for a third-party provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Default)]
pub struct GitHubConfig {
    pub oauth: Option<OAuthClient>,
    /// Access token obtained out of band.
    pub token: Option<String>,
    /// Repository that receives deployed artifacts.
    pub repo: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DriveConfig {
    pub oauth: Option<OAuthClient>,
    pub access_token: Option<String>,
    pub folder_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub agent_command: AgentCommand,
    pub agent_names: Vec<String>,
    pub agent_stop_timeout: Duration,
    pub scheduler_interval: Duration,
    pub service_marker: String,
    pub service_command: String,
    pub snapshot_retention: Option<usize>,
    pub github: GitHubConfig,
    pub gdrive: DriveConfig,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let database_path = match get("DATABASE_URL") {
            Some(url) => parse_database_url(&url)?,
            None => PathBuf::from(DEFAULT_DATABASE_PATH),
        };

        let agent_command = match get("AGENT_COMMAND") {
            Some(line) => AgentCommand::parse(&line).ok_or(ConfigError::Empty("AGENT_COMMAND"))?,
            None => AgentCommand::new(DEFAULT_AGENT_COMMAND, Vec::new()),
        };

        let agent_names = match get("AGENT_NAMES") {
            Some(list) => {
                let names: Vec<String> = list
                    .split(',')
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty())
                    .collect();
                if names.is_empty() {
                    return Err(ConfigError::Empty("AGENT_NAMES"));
                }
                names
            }
            None => DEFAULT_AGENT_NAMES.iter().map(|n| n.to_string()).collect(),
        };

        let service_marker = get("SERVICE_MARKER").unwrap_or_else(|| DEFAULT_SERVICE.to_string());
        let service_command = get("SERVICE_COMMAND").unwrap_or_else(|| DEFAULT_SERVICE.to_string());

        Ok(Self {
            database_path,
            host: get("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_or("PORT", get("PORT"), 3000)?,
            agent_command,
            agent_names,
            agent_stop_timeout: Duration::from_secs(parse_or(
                "AGENT_STOP_TIMEOUT_SECS",
                get("AGENT_STOP_TIMEOUT_SECS"),
                5,
            )?),
            scheduler_interval: Duration::from_secs(nonzero(
                "SCHEDULER_POLL_SECS",
                parse_or("SCHEDULER_POLL_SECS", get("SCHEDULER_POLL_SECS"), 60)?,
            )?),
            service_marker,
            service_command,
            snapshot_retention: match get("SNAPSHOT_RETENTION") {
                Some(v) => Some(parse_value("SNAPSHOT_RETENTION", &v)?),
                None => None,
            },
            github: GitHubConfig {
                oauth: oauth_pair(get("GITHUB_CLIENT_ID"), get("GITHUB_CLIENT_SECRET")),
                token: get("GITHUB_TOKEN"),
                repo: get("GITHUB_REPO"),
            },
            gdrive: DriveConfig {
                oauth: oauth_pair(get("GDRIVE_CLIENT_ID"), get("GDRIVE_CLIENT_SECRET")),
                access_token: get("GDRIVE_ACCESS_TOKEN"),
                folder_id: get("GDRIVE_FOLDER_ID"),
            },
        })
    }
}

fn oauth_pair(id: Option<String>, secret: Option<String>) -> Option<OAuthClient> {
    match (id, secret) {
        (Some(client_id), Some(client_secret)) => Some(OAuthClient {
            client_id,
            client_secret,
        }),
        _ => None,
    }
}

/// A zero sweep interval would make the scheduler thread spin.
fn nonzero(key: &'static str, value: u64) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        });
    }
    Ok(value)
}

fn parse_value<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn parse_or<T: std::str::FromStr>(
    key: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(v) => parse_value(key, &v),
        None => Ok(default),
    }
}

/// Resolve a database URL to a SQLite file path.
pub fn parse_database_url(url: &str) -> Result<PathBuf, ConfigError> {
    let path = if let Some(rest) = url.strip_prefix("sqlite://") {
        rest
    } else if let Some(rest) = url.strip_prefix("sqlite:") {
        rest
    } else if url.contains("://") {
        return Err(ConfigError::UnsupportedDatabase(url.to_string()));
    } else {
        url
    };

    if path.is_empty() {
        return Err(ConfigError::Empty("DATABASE_URL"));
    }
    Ok(PathBuf::from(path))
}
