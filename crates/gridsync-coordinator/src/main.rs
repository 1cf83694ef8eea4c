//! GridSync coordinator entry point.
//!
//! Loads the config file, applies CLI overrides, binds the listener and logs
//! every coordinator event until Ctrl-C.
//!
//! # Usage
//!
//! ```text
//! gridsync-coordinator [OPTIONS]
//!
//! Options:
//!   --bind   <ADDR>  IP address to bind        [env: GRIDSYNC_BIND]
//!   --port   <PORT>  TCP port to listen on     [env: GRIDSYNC_PORT]
//!   --config <PATH>  Explicit coordinator.toml [env: GRIDSYNC_CONFIG]
//! ```
//!
//! Values not given on the command line come from the config file, then from
//! the built-in defaults (`0.0.0.0:25565`).

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use gridsync_coordinator::application::handle_messages::CoordinatorEvent;
use gridsync_coordinator::infrastructure::node::CoordinatorNode;
use gridsync_coordinator::infrastructure::storage::config::{
    config_file_path, load_config, save_config, CoordinatorConfig, NetworkConfig,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// GridSync coordinator.
///
/// Accepts peer connections, collects the records they send and keeps every
/// peer's countdown in step.
#[derive(Debug, Parser)]
#[command(
    name = "gridsync-coordinator",
    about = "Coordinator for GridSync record and countdown synchronization",
    version
)]
struct Cli {
    /// IP address to bind the listener to.
    #[arg(long, env = "GRIDSYNC_BIND")]
    bind: Option<String>,

    /// TCP port to listen on.
    #[arg(long, env = "GRIDSYNC_PORT")]
    port: Option<u16>,

    /// Path to a coordinator.toml to use instead of the platform default.
    #[arg(long, env = "GRIDSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Write the effective settings (file plus flags) back to the config
    /// file before starting.
    #[arg(long)]
    save_config: bool,
}

impl Cli {
    /// Overlays the CLI flags on the file's network section.
    fn apply(&self, mut network: NetworkConfig) -> NetworkConfig {
        if let Some(bind) = &self.bind {
            network.bind_address = bind.clone();
        }
        if let Some(port) = self.port {
            network.port = port;
        }
        network
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref()).context("failed to load coordinator config")?;

    // `RUST_LOG` wins over the config file's level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.coordinator.log_level)),
        )
        .init();

    config.network = cli.apply(config.network);
    if cli.save_config {
        let path = persist_config(&config, cli.config.as_deref())?;
        info!("saved configuration to {}", path.display());
    }
    let network = config.network;
    let addr = network.socket_addr().context("invalid listen address")?;
    info!("GridSync coordinator starting on {addr}");

    let (node, mut events) = CoordinatorNode::new();
    let bound = node
        .listen(addr)
        .await
        .with_context(|| format!("failed to listen on {addr}"))?;
    info!("GridSync coordinator ready on {bound}.  Press Ctrl-C to exit.");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("shutdown signal received"),
                    Err(e) => error!("failed to listen for Ctrl-C signal: {e}"),
                }
                break;
            }
            event = events.recv() => match event {
                Some(event) => log_event(&event),
                None => break,
            },
        }
    }

    node.disconnect().await;
    let records = node.records().await;
    info!("GridSync coordinator stopped with {} record(s)", records.len());
    Ok(())
}

fn log_event(event: &CoordinatorEvent) {
    match event {
        CoordinatorEvent::ConnectionStateChanged {
            message,
            peer_count,
            ..
        } => info!("{message} ({peer_count} peer(s) connected)"),
        CoordinatorEvent::MessageReceived { message, origin } => {
            debug!("received from {origin:?}: {message}")
        }
        CoordinatorEvent::RecordAppended { index, record } => {
            let cells: Vec<String> = record.iter().map(|(c, v)| format!("{c}={v}")).collect();
            info!("record #{index}: {}", cells.join(", "));
        }
        CoordinatorEvent::TimerChanged { value, state } => info!("timer {value} ({state})"),
        CoordinatorEvent::Status(text) => info!("{text}"),
    }
}

/// Writes `config` to `path`, or to the platform default when `None`.
fn persist_config(config: &CoordinatorConfig, path: Option<&Path>) -> anyhow::Result<PathBuf> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => config_file_path().context("no config path to save to")?,
    };
    save_config(config, &path)
        .with_context(|| format!("failed to save config to {}", path.display()))?;
    Ok(path)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
