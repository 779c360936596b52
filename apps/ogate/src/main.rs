use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use ogate_common::GatewayConfig;
use ogate_core::{AppState, Collaborators, router};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ogate", about = "Multi-tenant OpenAI-compatible LLM gateway")]
struct Cli {
    /// Path to the JSON gateway config.
    #[arg(short, long, env = "OGATE_CONFIG", default_value = "ogate.json")]
    config: PathBuf,

    /// Override the listen host from the config file.
    #[arg(long)]
    host: Option<String>,

    /// Override the listen port from the config file.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let raw = std::fs::read(&cli.config)
        .with_context(|| format!("reading config {}", cli.config.display()))?;
    let mut config: GatewayConfig =
        serde_json::from_slice(&raw).context("parsing gateway config")?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    let addr = format!("{}:{}", config.host, config.port);
    let credentials = config.credentials.len();
    let state = AppState::build(config, Collaborators::default())?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(event = "listening", addr = %addr, credentials);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!(event = "shutdown");
}
