use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use relay_client::{ReconnectingTransport, TransportConfig, TransportError};
use relay_protocol::{MessageKind, Role};

/// Line-oriented relay endpoint.
///
/// Without a token this acts as the agent: stdin lines go out as terminal
/// output and incoming terminal input is printed. With a token it acts as a
/// viewer: stdin lines go out as terminal input and incoming terminal output
/// is printed.
#[derive(Parser)]
#[command(name = "relay-tap")]
#[command(about = "Attach to a relay hub as an agent or viewer")]
struct Cli {
    /// Hub WebSocket endpoint
    #[arg(short, long, default_value = "ws://localhost:8080/ws")]
    server: String,

    /// Device identifier shared by the agent and its viewers
    #[arg(short = 'i', long)]
    device_id: String,

    /// Pairing token; connect as a viewer
    #[arg(short, long)]
    token: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout carries only relayed content
    let default_directive = if cli.debug {
        "relay_client=debug,relay_tap=debug,info"
    } else {
        "relay_client=info,relay_tap=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let config = TransportConfig::new(cli.server, cli.device_id).with_token(cli.token);
    let role = config.role();
    let (outgoing, incoming) = match role {
        Role::Agent => (MessageKind::TerminalOutput, MessageKind::TerminalInput),
        Role::Viewer => (MessageKind::TerminalInput, MessageKind::TerminalOutput),
    };

    let transport = ReconnectingTransport::connect(config)
        .await
        .context("Failed to start transport")?;
    info!("Attached as {}", role);

    transport.on_message(move |env| {
        if env.kind != incoming {
            return;
        }
        if let Some(content) = env.content() {
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(content.as_bytes());
            if role == Role::Viewer && !content.ends_with('\n') {
                let _ = stdout.write_all(b"\n");
            }
            let _ = stdout.flush();
        }
    })?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                // Input is keystrokes for a shell; keep the newline
                let content = match role {
                    Role::Agent => line,
                    Role::Viewer => format!("{line}\n"),
                };
                match transport.send(outgoing.clone(), &json!({ "content": content })).await {
                    Ok(()) => {}
                    Err(TransportError::NotConnected) => warn!("Not connected, line dropped"),
                    Err(e) => warn!("Send failed: {}", e),
                }
            }
        }
    }

    transport.close().await;
    Ok(())
}
