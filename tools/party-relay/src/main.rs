//! Party Relay Server
//!
//! Standalone relay for shared avatar sessions. Participants connect with
//! `ws://host:port/?userId=<id>`.

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use party_core::DEFAULT_WS_PORT;
use party_router::Router;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::RelayConfig;

#[derive(Parser)]
#[command(name = "party-relay")]
#[command(about = "Party relay server")]
#[command(version)]
struct Cli {
    /// Listen address [default: 0.0.0.0:3000]
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Server name used in logs
    #[arg(short, long)]
    name: Option<String>,

    /// Maximum live participants
    #[arg(long)]
    max_participants: Option<usize>,

    /// Config file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(if cli.verbose { "debug" } else { "info" }, cli.json_logs)?;

    let file = match &cli.config {
        Some(path) => RelayConfig::load(path)?,
        None => RelayConfig::default(),
    };

    let mut router_config = file.router_config();
    if let Some(name) = cli.name {
        router_config.name = name;
    }
    if let Some(max) = cli.max_participants {
        router_config.max_participants = max;
    }
    let websocket_config = file.websocket_config();
    let listen = cli
        .listen
        .or(file.listen)
        .unwrap_or_else(|| SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_WS_PORT)));

    info!("Starting {}", router_config.name);
    info!("Listening on: ws://{}/?{}=<id>", listen, router_config.id_param);

    let router = Router::new(router_config);
    let addr = listen.to_string();

    tokio::select! {
        served = router.serve_websocket_with_config(&addr, websocket_config) => {
            served.with_context(|| format!("Relay on {} failed", addr))?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for ctrl+c")?;
            info!("Received shutdown signal");
            router.stop();
        }
    }

    info!(
        "Relay stopped with {} participants connected",
        router.participant_count()
    );
    Ok(())
}

fn setup_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Failed to parse log level")?;

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).compact())
            .init();
    }

    Ok(())
}
