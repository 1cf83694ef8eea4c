//! Network infrastructure for the peer.
//!
//! Owns the single TCP connection to the coordinator and forwards inbound
//! lines to the dispatch task as [`TransportEvent`]s.
//!
//! Architecture:
//! - `PeerConnection` holds a link state (idle, connecting, or one live link
//!   with its writer half and the read task's abort handle) behind an async
//!   mutex that is never held across the TCP handshake.
//! - Each link carries an epoch number.  A read loop only tears down the link
//!   it was started for, so a loop that ends late cannot clear a newer
//!   connection.
//! - Writes run on their own task, so a cancelled caller never leaves half a
//!   line on the socket.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use gridsync_core::protocol::{Frame, FrameReader, LINE_DELIMITER, MAX_LINE_BYTES};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::application::handle_messages::{LineSender, TransportEvent};

/// Errors that can occur in the peer network layer.
#[derive(Debug, Error)]
pub enum PeerNetworkError {
    /// TCP connection to the coordinator failed.
    #[error("failed to connect to coordinator at {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("already connected to a coordinator")]
    AlreadyConnected,

    #[error("not connected to a coordinator")]
    NotConnected,

    /// `disconnect` ran while the TCP connect was still in flight.
    #[error("connection attempt cancelled")]
    Cancelled,

    /// An I/O error occurred on the established connection.
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),
}

struct Link {
    epoch: u64,
    remote: SocketAddr,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    reader: AbortHandle,
}

enum LinkState {
    Idle,
    /// A TCP connect is in flight; `attempt` identifies it.
    Connecting {
        attempt: u64,
    },
    Connected(Link),
}

impl LinkState {
    fn live(&self) -> Option<&Link> {
        match self {
            LinkState::Connected(link) => Some(link),
            _ => None,
        }
    }
}

struct Shared {
    state: Mutex<LinkState>,
    next_epoch: AtomicU64,
    events: mpsc::UnboundedSender<TransportEvent>,
}

/// Manages the TCP connection from the peer to the coordinator.
#[derive(Clone)]
pub struct PeerConnection {
    shared: Arc<Shared>,
}

impl PeerConnection {
    /// Creates a (not yet connected) `PeerConnection` that reports to `events`.
    pub fn new(events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(LinkState::Idle),
                next_epoch: AtomicU64::new(0),
                events,
            }),
        }
    }

    /// Connects to `host:port` and starts the read loop.
    ///
    /// The state lock is not held while the TCP handshake is in flight, so
    /// [`PeerConnection::disconnect`] and sends stay prompt.  The attempt runs
    /// on its own task and always settles the state, even if the caller is
    /// dropped.
    ///
    /// Returns the coordinator's resolved address.
    ///
    /// # Errors
    ///
    /// - [`PeerNetworkError::AlreadyConnected`] if a link is live or another
    ///   connect is in flight.
    /// - [`PeerNetworkError::ConnectFailed`] if the TCP connect fails.
    /// - [`PeerNetworkError::Cancelled`] if `disconnect` ran before the
    ///   handshake finished.
    pub async fn connect(&self, host: &str, port: u16) -> Result<SocketAddr, PeerNetworkError> {
        let attempt = {
            let mut state = self.shared.state.lock().await;
            if !matches!(*state, LinkState::Idle) {
                return Err(PeerNetworkError::AlreadyConnected);
            }
            let attempt = self.shared.next_epoch.fetch_add(1, Ordering::Relaxed);
            *state = LinkState::Connecting { attempt };
            attempt
        };

        let shared = Arc::clone(&self.shared);
        let host = host.to_string();
        tokio::spawn(async move { establish(shared, attempt, host, port).await })
            .await
            .map_err(|e| PeerNetworkError::Io(std::io::Error::other(e)))?
    }

    /// Closes the connection, or abandons a connect that is still in flight.
    /// A no-op when idle.
    pub async fn disconnect(&self) {
        let taken = {
            let mut state = self.shared.state.lock().await;
            match std::mem::replace(&mut *state, LinkState::Idle) {
                LinkState::Connected(link) => {
                    self.shared.notify(false, "Disconnected from server.", 0);
                    Some(link)
                }
                LinkState::Connecting { attempt } => {
                    debug!("abandoning connect attempt {attempt}");
                    None
                }
                LinkState::Idle => {
                    debug!("disconnect requested while not connected");
                    None
                }
            }
        };
        let Some(link) = taken else {
            return;
        };
        info!("disconnecting from coordinator at {}", link.remote);
        link.reader.abort();
        if let Err(e) = link.writer.lock().await.shutdown().await {
            debug!("shutdown of connection to {} failed: {e}", link.remote);
        };
    }

    pub async fn is_connected(&self) -> bool {
        self.shared.state.lock().await.live().is_some()
    }

    /// Address of the connected coordinator, if any.
    pub async fn remote_addr(&self) -> Option<SocketAddr> {
        self.shared.state.lock().await.live().map(|link| link.remote)
    }

    /// Writes `line` and a trailing `\n` to the coordinator.
    ///
    /// # Errors
    ///
    /// - [`PeerNetworkError::NotConnected`] without a live link.
    /// - [`PeerNetworkError::Io`] if the write fails.
    pub async fn send(&self, line: &str) -> Result<(), PeerNetworkError> {
        let writer = {
            let state = self.shared.state.lock().await;
            let link = state.live().ok_or(PeerNetworkError::NotConnected)?;
            Arc::clone(&link.writer)
        };

        let mut frame = String::with_capacity(line.len() + 1);
        frame.push_str(line);
        frame.push(LINE_DELIMITER);

        tokio::spawn(async move { writer.lock().await.write_all(frame.as_bytes()).await })
            .await
            .map_err(|e| PeerNetworkError::Io(std::io::Error::other(e)))?
            .map_err(|e| {
                error!("failed to send line: {e}");
                PeerNetworkError::Io(e)
            })
    }
}

/// Runs one connect attempt and installs the link if the attempt is still
/// the current one.
async fn establish(
    shared: Arc<Shared>,
    attempt: u64,
    host: String,
    port: u16,
) -> Result<SocketAddr, PeerNetworkError> {
    let result = TcpStream::connect((host.as_str(), port)).await;

    let mut state = shared.state.lock().await;
    if !matches!(*state, LinkState::Connecting { attempt: current } if current == attempt) {
        drop(state);
        info!("connect to {host}:{port} abandoned by disconnect");
        shared.notify(false, "Connection attempt cancelled.", 0);
        return Err(PeerNetworkError::Cancelled);
    }

    let stream = match result {
        Ok(stream) => stream,
        Err(source) => {
            *state = LinkState::Idle;
            warn!("could not connect to coordinator at {host}:{port}: {source}");
            shared.notify(false, format!("Connection error: {source}"), 0);
            return Err(PeerNetworkError::ConnectFailed {
                addr: format!("{host}:{port}"),
                source,
            });
        }
    };
    let remote = match stream.peer_addr() {
        Ok(remote) => remote,
        Err(e) => {
            *state = LinkState::Idle;
            warn!("connection to {host}:{port} dropped during setup: {e}");
            shared.notify(false, format!("Connection error: {e}"), 0);
            return Err(PeerNetworkError::Io(e));
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        debug!("set_nodelay failed for {remote}: {e}");
    }
    let (reader, writer) = stream.into_split();

    let read_task = tokio::spawn(read_loop(Arc::clone(&shared), attempt, reader));
    *state = LinkState::Connected(Link {
        epoch: attempt,
        remote,
        writer: Arc::new(Mutex::new(writer)),
        reader: read_task.abort_handle(),
    });
    info!("connected to coordinator at {remote}");
    shared.notify(true, "Connected to server.", 1);
    Ok(remote)
}

#[async_trait]
impl LineSender for PeerConnection {
    async fn send_line(&self, line: &str) -> Result<(), String> {
        self.send(line).await.map_err(|e| e.to_string())
    }

    async fn is_connected(&self) -> bool {
        PeerConnection::is_connected(self).await
    }
}

impl Shared {
    fn notify(&self, connected: bool, message: impl Into<String>, peer_count: usize) {
        let _ = self.events.send(TransportEvent::StateChanged {
            connected,
            message: message.into(),
            peer_count,
        });
    }
}

/// Reads lines from the coordinator until EOF or an I/O error, then clears
/// the link it was started for.
async fn read_loop(shared: Arc<Shared>, epoch: u64, reader: OwnedReadHalf) {
    let mut frames = FrameReader::new(reader);
    loop {
        match frames.next_frame().await {
            Ok(Some(Frame::Line(line))) => {
                let _ = shared.events.send(TransportEvent::LineReceived(line));
            }
            Ok(Some(Frame::Oversized(dropped))) => {
                warn!("dropped {dropped} byte line from coordinator: over {MAX_LINE_BYTES} bytes");
            }
            Ok(None) => {
                info!("coordinator closed the connection");
                break;
            }
            Err(e) => {
                warn!("read from coordinator failed: {e}");
                break;
            }
        }
    }

    let mut state = shared.state.lock().await;
    if state.live().map(|link| link.epoch) != Some(epoch) {
        return;
    }
    if let LinkState::Connected(stale) = std::mem::replace(&mut *state, LinkState::Idle) {
        shared.notify(false, "Disconnected from server.", 0);
        drop(state);
        let _ = stale.writer.lock().await.shutdown().await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
