//! CoordinatorServer: TCP listener, per-session read loops and fan-out writes.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gridsync_core::protocol::{Frame, FrameReader, LINE_DELIMITER, MAX_LINE_BYTES};
use gridsync_core::{SendTarget, SessionId};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::handle_messages::{Broadcaster, TransportEvent};
use crate::application::manage_sessions::SessionRegistry;

/// First pause after a failed `accept`; doubles up to [`ACCEPT_BACKOFF_MAX`].
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(50);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(2);

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("bind failed on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server is already listening")]
    AlreadyListening,

    #[error("no live connection matches the target")]
    NotConnected,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One live connection in the registry.
#[derive(Debug)]
struct SessionHandle {
    peer_addr: SocketAddr,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    reader: AbortHandle,
}

struct Shared {
    registry: Mutex<SessionRegistry<SessionHandle>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

/// The coordinator's transport.
///
/// All registry mutation (accept, read-loop exit, failed writes and
/// [`CoordinatorServer::disconnect`]) goes through one async mutex, and each
/// state-changed event is sent while that mutex is held so events are
/// ordered the same way as the mutations they report.
#[derive(Clone)]
pub struct CoordinatorServer {
    shared: Arc<Shared>,
}

impl CoordinatorServer {
    /// Creates a stopped server that reports to `events`.
    pub fn new(events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(SessionRegistry::new()),
                accept_task: Mutex::new(None),
                events,
            }),
        }
    }

    /// Binds `addr` and starts accepting peers in a background task.
    ///
    /// Returns the bound address, which differs from `addr` when port 0 was
    /// requested.
    ///
    /// # Errors
    ///
    /// - [`NetworkError::AlreadyListening`] if a previous `listen` is active.
    /// - [`NetworkError::Bind`] if the socket cannot be bound.
    pub async fn listen(&self, addr: SocketAddr) -> Result<SocketAddr, NetworkError> {
        let mut accept_task = self.shared.accept_task.lock().await;
        if accept_task.is_some() {
            return Err(NetworkError::AlreadyListening);
        }

        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(source) => {
                warn!("bind failed on {addr}: {source}");
                let registry = self.shared.registry.lock().await;
                self.shared.notify(false, format!("Server error: {source}"), registry.count());
                return Err(NetworkError::Bind { addr, source });
            }
        };
        let local_addr = listener.local_addr()?;

        info!("coordinator listening on {local_addr}");
        self.shared.notify(true, "Server started.", 0);
        let shared = Arc::clone(&self.shared);
        *accept_task = Some(tokio::spawn(accept_loop(shared, listener)));
        Ok(local_addr)
    }

    /// Stops accepting and closes every session.  A no-op when not listening.
    pub async fn disconnect(&self) {
        let Some(accept_task) = self.shared.accept_task.lock().await.take() else {
            debug!("disconnect requested while not listening");
            return;
        };
        accept_task.abort();

        let drained = {
            let mut registry = self.shared.registry.lock().await;
            let drained = registry.drain();
            self.shared.notify(false, "Server stopped.", 0);
            drained
        };
        info!("server stopped, closing {} session(s)", drained.len());
        for (id, handle) in drained {
            close_session(id, handle).await;
        }
    }

    pub async fn is_listening(&self) -> bool {
        self.shared.accept_task.lock().await.is_some()
    }

    pub async fn peer_count(&self) -> usize {
        self.shared.registry.lock().await.count()
    }

    /// Writes `line` and a trailing `\n` to every session `target` addresses.
    ///
    /// Sessions whose write fails are removed individually; the call succeeds
    /// if at least one write succeeded.  The writes run on their own task, so
    /// a cancelled caller never leaves half a line on a socket.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::NotConnected`] if no targeted session received
    /// the line.
    pub async fn send_to(&self, line: &str, target: SendTarget) -> Result<usize, NetworkError> {
        let writers: Vec<(SessionId, Arc<Mutex<OwnedWriteHalf>>)> = {
            let registry = self.shared.registry.lock().await;
            registry
                .iter()
                .filter(|(id, _)| target.includes(*id))
                .map(|(id, handle)| (id, Arc::clone(&handle.writer)))
                .collect()
        };
        if writers.is_empty() {
            return Err(NetworkError::NotConnected);
        }

        let mut frame = String::with_capacity(line.len() + 1);
        frame.push_str(line);
        frame.push(LINE_DELIMITER);

        let shared = Arc::clone(&self.shared);
        let delivered = tokio::spawn(async move {
            let mut delivered = 0;
            let mut failed = Vec::new();
            for (id, writer) in writers {
                let result = writer.lock().await.write_all(frame.as_bytes()).await;
                match result {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        warn!("write to session {id} failed: {e}");
                        failed.push(id);
                    }
                }
            }
            for id in failed {
                if let Some(handle) = shared.remove_session(id).await {
                    close_session(id, handle).await;
                }
            }
            delivered
        })
        .await
        .map_err(|e| NetworkError::Io(std::io::Error::other(e)))?;

        if delivered == 0 {
            return Err(NetworkError::NotConnected);
        }
        Ok(delivered)
    }
}

#[async_trait]
impl Broadcaster for CoordinatorServer {
    async fn broadcast(&self, line: &str, target: SendTarget) -> Result<usize, String> {
        self.send_to(line, target).await.map_err(|e| e.to_string())
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

    /// Removes `id`, reporting the disconnect only if this call removed it.
    async fn remove_session(&self, id: SessionId) -> Option<SessionHandle> {
        let mut registry = self.registry.lock().await;
        let handle = registry.remove(id)?;
        info!("session {id} ({}) removed", handle.peer_addr);
        self.notify(true, "Client disconnected.", registry.count());
        Some(handle)
    }
}

async fn accept_loop(shared: Arc<Shared>, listener: TcpListener) {
    let mut backoff = ACCEPT_BACKOFF_MIN;
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                backoff = ACCEPT_BACKOFF_MIN;
                register_session(&shared, stream, peer_addr).await;
            }
            // Per-connection failures (reset before accept) say nothing about
            // the listener itself.
            Err(e) if is_transient_accept_error(&e) => debug!("accept aborted: {e}"),
            Err(e) => {
                warn!("accept failed, retrying in {backoff:?}: {e}");
                let registry = shared.registry.lock().await;
                shared.notify(true, format!("Server error: {e}"), registry.count());
                drop(registry);
                time::sleep(backoff).await;
                backoff = (backoff * 2).min(ACCEPT_BACKOFF_MAX);
            }
        }
    }
}

fn is_transient_accept_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset | ErrorKind::Interrupted
    )
}

async fn register_session(shared: &Arc<Shared>, stream: TcpStream, peer_addr: SocketAddr) {
    let id = Uuid::new_v4();
    if let Err(e) = stream.set_nodelay(true) {
        debug!("set_nodelay failed for {peer_addr}: {e}");
    }
    let (reader, writer) = stream.into_split();

    // Held across spawn and insert so the read loop cannot remove the entry
    // before it exists.
    let mut registry = shared.registry.lock().await;
    let read_task = tokio::spawn(read_loop(Arc::clone(shared), id, reader));
    registry.add(
        id,
        SessionHandle {
            peer_addr,
            writer: Arc::new(Mutex::new(writer)),
            reader: read_task.abort_handle(),
        },
    );
    info!("session {id} accepted from {peer_addr}");
    shared.notify(true, "Client connected.", registry.count());
}

async fn read_loop(shared: Arc<Shared>, id: SessionId, reader: OwnedReadHalf) {
    let mut frames = FrameReader::new(reader);
    loop {
        match frames.next_frame().await {
            Ok(Some(Frame::Line(line))) => {
                let _ = shared
                    .events
                    .send(TransportEvent::LineReceived { origin: id, line });
            }
            Ok(Some(Frame::Oversized(dropped))) => {
                warn!("dropped {dropped} byte line from session {id}: over {MAX_LINE_BYTES} bytes");
            }
            Ok(None) => {
                info!("session {id} closed by peer");
                break;
            }
            Err(e) => {
                warn!("read from session {id} failed: {e}");
                break;
            }
        }
    }
    if let Some(handle) = shared.remove_session(id).await {
        // This task is the reader; only the writer is left to close.
        let _ = handle.writer.lock().await.shutdown().await;
    }
}

async fn close_session(id: SessionId, handle: SessionHandle) {
    handle.reader.abort();
    if let Err(e) = handle.writer.lock().await.shutdown().await {
        debug!("shutdown of session {id} failed: {e}");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
