use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use minichat::config::Config;
use minichat::server::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        default_model = %config.llm.default_model,
        storage_configured = config.storage.is_configured(),
        "starting minichat gateway"
    );

    let state = Arc::new(AppState::from_config(&config)?);
    server::serve(config.server.bind, state).await?;

    Ok(())
}
