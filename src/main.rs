//! Agent panel server binary.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use agent_panel::api::{self, AppState};
use agent_panel::{Config, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; real environment variables still apply.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("agent_panel=info")),
        )
        .init();

    let config = Config::from_env().context("Invalid configuration")?;
    let store = Store::open(&config.database_path).with_context(|| {
        format!(
            "Failed to open database at {}",
            config.database_path.display()
        )
    })?;

    tracing::info!(
        agents = ?config.agent_names,
        database = %config.database_path.display(),
        "Starting agent panel"
    );

    let state = Arc::new(AppState::new(config, store));
    api::serve(state).await
}
