use financial_search_engine::{agent::Orchestrator, api::start_server, config::AppConfig};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;

    for key in config.missing_keys() {
        warn!("{} not set; the features that depend on it will report as not configured", key);
    }

    info!("Financial Search Engine - API Server");
    info!("Port: {}", config.port);

    let orchestrator = Arc::new(Orchestrator::from_config(&config)?);
    info!("Orchestrator initialized");

    start_server(orchestrator, config.port, &config.cors_origins).await?;

    Ok(())
}
