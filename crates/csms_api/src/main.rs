use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use csms_api::{AppState, config::ServerConfig, create_app, spawn_call_sweeper};
use tracing_subscriber::EnvFilter;

/// Command line arguments for the electra-csms server
#[derive(Parser, Debug)]
#[command(name = "electra-csms")]
#[command(about = "Electra OCPP 1.6 central system")]
struct Args {
    /// Port to bind the server to
    #[arg(short, long, env = "PORT", default_value = "8080")]
    port: u16,

    /// Address to bind the server to
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Optional path to a JSON file with protocol settings
    #[arg(short, long)]
    config: Option<PathBuf>,
}

async fn load_config(path: Option<&PathBuf>) -> anyhow::Result<ServerConfig> {
    let Some(path) = path else {
        return Ok(ServerConfig::default());
    };

    let config_content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    let config: ServerConfig = serde_json::from_str(&config_content)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))?;

    tracing::info!("Loaded server config from {}", path.display());
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let server_config = load_config(args.config.as_ref()).await?;

    // Create application state
    let app_state = AppState::new(server_config.engine_config());
    spawn_call_sweeper(app_state.clone(), Duration::from_secs(1));

    // Build our application with routes
    let app = create_app(app_state);

    let bind_addr = format!("{}:{}", args.bind, args.port);
    tracing::info!("Starting server on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
