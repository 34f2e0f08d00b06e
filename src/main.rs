use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use log::{info, warn};
use tokio::sync::mpsc;

mod adapter;
mod config;
mod error;
mod messages;
mod net;
mod registry;

/// Tracks LAN machines by MAC address and wakes them on demand.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    let contents = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("reading {}", cli.config.display()))?;
    let config: config::AppConfig = toml::de::from_str(&contents)?;

    info!("Devices: {:?}", config.devices);

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let probe = Arc::new(net::LanProbe::new(&config.wol));
    let adapter = adapter::WolAdapter::new(&config, probe, events_tx);
    adapter.seed(&config.devices).await;

    // Stand-in for the gateway: log every host-facing event as JSON.
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => info!("host event: {}", json),
                Err(err) => warn!("unencodable host event: {}", err),
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    adapter.unload();

    Ok(())
}
