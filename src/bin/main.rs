use clap::Parser;
use financial_search_engine::{
    agent::Orchestrator,
    config::AppConfig,
    models::{SearchMode, SearchRequest},
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "orchestrator")]
#[command(about = "Answer one financial question from the command line", long_about = None)]
struct Cli {
    /// The question to answer
    query: String,

    /// Synthesis mode: default (sonar), comprehensive (deepseek) or narrative (deep_research)
    #[arg(long, default_value = "default", value_parser = parse_mode)]
    mode: SearchMode,

    /// Continue an existing session
    #[arg(long)]
    session: Option<String>,

    /// Print the raw data block as JSON after the answer
    #[arg(long)]
    show_data: bool,
}

fn parse_mode(raw: &str) -> Result<SearchMode, String> {
    serde_json::from_value(serde_json::Value::String(raw.to_lowercase()))
        .map_err(|_| format!("unknown mode '{}'", raw))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    if cli.query.trim().is_empty() {
        return Err("query cannot be empty".into());
    }

    let config = AppConfig::from_env()?;
    let orchestrator = Arc::new(Orchestrator::from_config(&config)?);

    info!(mode = %cli.mode, "Running one-shot query");
    let response = orchestrator
        .ask(SearchRequest {
            query: cli.query,
            mode: cli.mode,
            session_id: cli.session,
        })
        .await;

    println!("{}\n", response.answer);

    if !response.sources.is_empty() {
        println!("Sources:");
        for (i, source) in response.sources.iter().enumerate() {
            println!(
                "  [{}] {} {}",
                i + 1,
                source.title.as_deref().unwrap_or(""),
                source.url.as_deref().unwrap_or("")
            );
        }
    }

    if cli.show_data {
        println!("\n{}", serde_json::to_string_pretty(&response.data)?);
    }

    println!("\nSession: {}", response.session_id);
    Ok(())
}
