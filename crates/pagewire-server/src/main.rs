//! # pagewire-server
//!
//! Runs a session gateway: loads settings, binds the WebSocket endpoint,
//! and serves page sessions until Ctrl-C.

#![deny(unsafe_code)]

mod logging;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use pagewire_gateway::Gateway;
use pagewire_settings::{GatewaySettings, load_settings_from_path, settings_path};

/// pagewire session gateway.
#[derive(Parser, Debug)]
#[command(name = "pagewire-server", about = "Broker RPC calls into connected browser pages")]
struct Cli {
    /// Settings file (defaults to `~/.pagewire/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn gateway_settings(&self) -> Result<GatewaySettings> {
        let path = self.settings.clone().unwrap_or_else(settings_path);
        let mut gateway = load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?
            .gateway;
        if let Some(host) = &self.host {
            gateway.host.clone_from(host);
        }
        if let Some(port) = self.port {
            gateway.port = port;
        }
        Ok(gateway)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    logging::init_subscriber(&args.log_level, args.log_json);

    let settings = args.gateway_settings()?;
    let gateway = Gateway::new(settings).context("Invalid gateway settings")?;
    let addr = gateway.start().await.context("Failed to bind gateway")?;
    tracing::info!("pagewire gateway listening on ws://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    gateway.stop().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
