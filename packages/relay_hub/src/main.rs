use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::prelude::*;

use relay_hub::{AppState, FileConfig, HubConfig, load_config};

#[derive(Parser)]
#[command(name = "relay-hub")]
#[command(about = "Relay terminal output and input between an agent and its viewers")]
struct Cli {
    /// Port for the web server (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides config)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Path to the TOML config file
    #[arg(short, long, default_value = "relay.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let default_directive = if cli.debug {
        "relay_hub=debug,tower_http=debug,info"
    } else {
        "relay_hub=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let mut file_config: FileConfig = load_config(&cli.config)
        .extract()
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;
    if let Some(host) = cli.host {
        file_config.server.host = host;
    }
    if let Some(port) = cli.port {
        file_config.server.port = port;
    }
    let config = HubConfig::from_file(&file_config);

    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let actual_addr = listener.local_addr()?;

    info!(
        "Hub config: send_queue={}, write_timeout={:?}, ping_interval={:?}, idle_timeout={:?}",
        config.websocket.send_queue_capacity,
        config.websocket.write_timeout,
        config.websocket.ping_interval,
        config.websocket.idle_timeout
    );
    info!("Relay hub listening on http://{}", actual_addr);
    info!("  GET /ws?device_id=..[&token=..] - WebSocket relay");
    info!("  GET /api/devices/:id            - Device connection counts");
    info!("  GET /api/metrics                - Hub metrics");
    info!("  GET /health                     - Health check");

    let shutdown_signal = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal");
    };

    relay_hub::serve(listener, AppState::new(config), shutdown_signal)
        .await
        .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}
