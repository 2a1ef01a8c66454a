//! Planner Gateway - Main entry point.

use anyhow::Result;
use planner_common::config::{load_dotenv, Config};
use planner_common::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Local runs keep GEMINI_API_KEY and friends in .env
    let dotenv = load_dotenv();

    // Load configuration
    let config = Config::load_with_env()?;

    // Initialize logging
    init_logging(&config.observability.log_level, &config.observability.log_format);

    tracing::info!("Planner Gateway v{}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = dotenv {
        tracing::info!(path = %path.display(), "Loaded environment file");
    }

    config.validate()?;

    planner_gateway::start_server(&config).await
}
