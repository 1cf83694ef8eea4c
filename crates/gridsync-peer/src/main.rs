//! GridSync peer entry point.
//!
//! Loads the config file, applies CLI overrides and reads line commands from
//! stdin until `quit`, end of input or Ctrl-C.
//!
//! # Usage
//!
//! ```text
//! gridsync-peer [OPTIONS]
//!
//! Options:
//!   --host            <HOST>  Coordinator host           [env: GRIDSYNC_HOST]
//!   --port            <PORT>  Coordinator port           [env: GRIDSYNC_PORT]
//!   --config          <PATH>  Explicit peer.toml         [env: GRIDSYNC_CONFIG]
//!   --confirm-timeout <SECS>  Seconds to await CONFIRM   [env: GRIDSYNC_CONFIRM_TIMEOUT]
//!   --connect                 Connect immediately
//! ```
//!
//! # Commands
//!
//! ```text
//! connect [host:port]      disconnect
//! columns a,b,c            add col=value ...        rows
//! send [row | col=value ...]
//! set hh:mm:ss             start  stop  resume  reset
//! status                   help   quit
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use gridsync_core::{Record, TimerValue};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use gridsync_peer::application::handle_messages::PeerEvent;
use gridsync_peer::application::transfer::TransferState;
use gridsync_peer::infrastructure::network::PeerNetworkError;
use gridsync_peer::infrastructure::node::PeerNode;
use gridsync_peer::infrastructure::storage::config::{
    config_file_path, load_config, save_config, PeerConfig,
};

const HELP: &str = "\
commands:
  connect [host:port]         connect to the coordinator
  disconnect                  close the connection
  columns a,b,c               add columns to the grid
  add col=value ...           append a row to the grid
  rows                        print the grid
  send [row | col=value ...]  send a row (default: the last one)
  set hh:mm:ss                set the countdown
  start | stop | resume | reset
  status                      connection, timer and transfer state
  quit";

// ── CLI argument definitions ──────────────────────────────────────────────────

/// GridSync peer.
///
/// Sends records to the coordinator and follows the shared countdown.
#[derive(Debug, Parser)]
#[command(
    name = "gridsync-peer",
    about = "Peer for GridSync record and countdown synchronization",
    version
)]
struct Cli {
    /// Coordinator host name or IP address.
    #[arg(long, env = "GRIDSYNC_HOST")]
    host: Option<String>,

    /// Coordinator TCP port.
    #[arg(long, env = "GRIDSYNC_PORT")]
    port: Option<u16>,

    /// Path to a peer.toml to use instead of the platform default.
    #[arg(long, env = "GRIDSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Seconds a record transfer waits for CONFIRM.
    #[arg(long, env = "GRIDSYNC_CONFIRM_TIMEOUT")]
    confirm_timeout: Option<u64>,

    /// Connect to the configured coordinator at startup.
    #[arg(long)]
    connect: bool,

    /// Write the effective settings (file plus flags) back to the config
    /// file before starting.
    #[arg(long)]
    save_config: bool,
}

impl Cli {
    /// Overlays the CLI flags on the file's settings.
    fn apply(&self, mut config: PeerConfig) -> PeerConfig {
        if let Some(host) = &self.host {
            config.network.host = host.clone();
        }
        if let Some(port) = self.port {
            config.network.port = port;
        }
        if let Some(secs) = self.confirm_timeout {
            config.peer.confirm_timeout_secs = secs;
        }
        config
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Connect(Option<(String, u16)>),
    Disconnect,
    Columns(Vec<String>),
    Add(Record),
    Rows,
    /// `None` sends the most recently added row.
    SendRow(Option<usize>),
    SendRecord(Record),
    Set(TimerValue),
    Start,
    Stop,
    Resume,
    Reset,
    Status,
    Help,
    Quit,
}

/// Parses one stdin line.  `Ok(None)` for a blank line; `Err` carries the
/// text to show the user.
fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    let command = match word.to_ascii_lowercase().as_str() {
        "" => return Ok(None),
        "connect" if rest.is_empty() => Command::Connect(None),
        "connect" => Command::Connect(Some(parse_address(rest)?)),
        "disconnect" => Command::Disconnect,
        "columns" => {
            let columns: Vec<String> = rest
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect();
            if columns.is_empty() {
                return Err("Usage: columns a,b,c".to_string());
            }
            Command::Columns(columns)
        }
        "add" => Command::Add(parse_pairs(rest).ok_or("Usage: add col=value ...")?),
        "rows" => Command::Rows,
        "send" if rest.is_empty() => Command::SendRow(None),
        "send" => match rest.parse::<usize>() {
            Ok(index) => Command::SendRow(Some(index)),
            Err(_) => Command::SendRecord(
                parse_pairs(rest).ok_or("Usage: send [row | col=value ...]")?,
            ),
        },
        "set" => Command::Set(
            TimerValue::parse_entry(rest).map_err(|_| "Invalid timer format.".to_string())?,
        ),
        "start" => Command::Start,
        "stop" => Command::Stop,
        "resume" => Command::Resume,
        "reset" => Command::Reset,
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("Unknown command {other:?}; type 'help'.")),
    };
    Ok(Some(command))
}

/// `IP:Port`, exactly one colon.
fn parse_address(text: &str) -> Result<(String, u16), String> {
    let invalid = || "Invalid address format. Use IP:Port".to_string();
    let mut parts = text.split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(host), Some(port), None) if !host.is_empty() => {
            let port = port.parse::<u16>().map_err(|_| invalid())?;
            Ok((host.to_string(), port))
        }
        _ => Err(invalid()),
    }
}

/// `col=value` tokens in order; `None` if any token is malformed or none given.
fn parse_pairs(text: &str) -> Option<Record> {
    let pairs: Vec<(String, String)> = text
        .split_whitespace()
        .map(|token| {
            let (column, value) = token.split_once('=')?;
            (!column.is_empty()).then(|| (column.to_string(), value.to_string()))
        })
        .collect::<Option<_>>()?;
    (!pairs.is_empty()).then(|| Record::from_pairs(pairs))
}

/// Runs one command.  Returns `false` when the loop should exit.
async fn execute(node: &PeerNode, config: &PeerConfig, command: Command) -> bool {
    let client = node.client();
    match command {
        Command::Connect(address) => {
            let (host, port) =
                address.unwrap_or_else(|| (config.network.host.clone(), config.network.port));
            match node.connect(&host, port).await {
                Ok(addr) => debug!("connected to {addr}"),
                // Other failures are reported by the state-changed event.
                Err(PeerNetworkError::AlreadyConnected) => println!("Already connected."),
                Err(e) => debug!("connect failed: {e}"),
            }
        }
        Command::Disconnect => node.disconnect().await,
        Command::Columns(columns) => {
            let added = client.add_columns(&columns).await;
            println!("{added} column(s) added: {}", client.columns().await.join(", "));
        }
        Command::Add(record) => {
            let index = client.add_record(record).await;
            println!("row {index} added");
        }
        Command::Rows => print_rows(&client.columns().await, &client.rows().await),
        Command::SendRow(index) => {
            let index = match index {
                Some(index) => index,
                None => client.records().await.len().saturating_sub(1),
            };
            // Outcomes arrive as events.
            let _ = client.send_row(index).await;
        }
        Command::SendRecord(record) => {
            let index = client.add_record(record).await;
            let _ = client.send_row(index).await;
        }
        Command::Set(value) => client.set_timer(value).await,
        Command::Start => {
            let _ = client.start_timer().await;
        }
        Command::Stop => {
            let _ = client.stop_timer().await;
        }
        Command::Resume => {
            let _ = client.resume_timer().await;
        }
        Command::Reset => client.reset_timer().await,
        Command::Status => {
            match node.connection().remote_addr().await {
                Some(addr) => println!("connected to {addr}"),
                None => println!("not connected"),
            }
            let (value, state) = client.timer().await;
            println!("timer {value} ({state})");
            match client.transfer_state().await {
                TransferState::Idle => println!("no transfer pending"),
                TransferState::AwaitingConfirmation { id, .. } => {
                    println!("transfer {id} awaiting confirmation")
                }
            }
            println!(
                "{} column(s), {} row(s)",
                client.columns().await.len(),
                client.records().await.len()
            );
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => return false,
    }
    true
}

fn print_rows(columns: &[String], rows: &[Vec<String>]) {
    if columns.is_empty() {
        println!("(no columns)");
        return;
    }
    println!("#\t{}", columns.join("\t"));
    for (index, row) in rows.iter().enumerate() {
        println!("{index}\t{}", row.join("\t"));
    }
}

fn render_event(event: &PeerEvent) {
    match event {
        PeerEvent::ConnectionStateChanged { message, .. } => println!("{message}"),
        PeerEvent::MessageReceived { message, .. } => debug!("received: {message}"),
        PeerEvent::TimerChanged { value, state } => println!("timer {value} ({state})"),
        PeerEvent::Status(text) => println!("{text}"),
        PeerEvent::TransferResolved(outcome) => debug!("transfer resolved: {outcome:?}"),
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let file = load_config(cli.config.as_deref()).context("failed to load peer config")?;
    let config = cli.apply(file);

    // Logs go to stderr so they do not interleave with command output.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.peer.log_level)),
        )
        .init();

    if cli.save_config {
        let path = persist_config(&config, cli.config.as_deref())?;
        info!("saved configuration to {}", path.display());
    }

    let confirm_timeout = config.peer.confirm_timeout();
    info!("GridSync peer starting (confirm timeout {confirm_timeout:?})");
    let (node, mut events) = PeerNode::new(confirm_timeout);

    if cli.connect {
        execute(&node, &config, Command::Connect(None)).await;
    }
    println!("Type 'help' for commands.");

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
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
                Some(event) => render_event(&event),
                None => break,
            },
            line = stdin.next_line() => match line {
                Ok(Some(line)) => match parse_command(&line) {
                    Ok(Some(command)) => {
                        if !execute(&node, &config, command).await {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(text) => println!("{text}"),
                },
                Ok(None) => break,
                Err(e) => {
                    error!("failed to read stdin: {e}");
                    break;
                }
            },
        }
    }

    node.disconnect().await;
    info!("GridSync peer stopped");
    Ok(())
}

/// Writes `config` to `path`, or to the platform default when `None`.
fn persist_config(config: &PeerConfig, path: Option<&Path>) -> anyhow::Result<PathBuf> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => config_file_path().context("no config path to save to")?,
    };
    save_config(config, &path)
        .with_context(|| format!("failed to save config to {}", path.display()))?;
    Ok(path)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
