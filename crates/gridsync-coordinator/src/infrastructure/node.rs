//! CoordinatorNode: wires the TCP listener to the coordinator use case.
//!
//! ```text
//!  CoordinatorServer ──TransportEvent──► dispatch task ──► SyncCoordinator
//!        ▲                                                     │
//!        └──────────────── Broadcaster::broadcast ◄────────────┘
//!                                                              │
//!                                      CoordinatorEvent ◄──────┘  (to the UI)
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use gridsync_core::{Record, TimerState, TimerValue};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::application::handle_messages::{Broadcaster, CoordinatorEvent, SyncCoordinator};
use crate::infrastructure::network::{CoordinatorServer, NetworkError};

/// Capacity of the channel carrying [`CoordinatorEvent`]s to the UI.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A running coordinator: listener, dispatch task and shared state.
pub struct CoordinatorNode {
    server: CoordinatorServer,
    coordinator: SyncCoordinator,
    dispatch: JoinHandle<()>,
}

impl CoordinatorNode {
    /// Creates a stopped node and the receiver for its UI events.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new() -> (Self, mpsc::Receiver<CoordinatorEvent>) {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let server = CoordinatorServer::new(transport_tx);
        let broadcaster: Arc<dyn Broadcaster> = Arc::new(server.clone());
        let coordinator = SyncCoordinator::new(broadcaster, event_tx);
        let dispatch = tokio::spawn(coordinator.clone().run(transport_rx));

        (
            Self {
                server,
                coordinator,
                dispatch,
            },
            event_rx,
        )
    }

    /// Starts listening on `addr`; see [`CoordinatorServer::listen`].
    ///
    /// # Errors
    ///
    /// Propagates [`NetworkError`] from the listener.
    pub async fn listen(&self, addr: SocketAddr) -> Result<SocketAddr, NetworkError> {
        self.server.listen(addr).await
    }

    /// Closes every session and stops listening.
    pub async fn disconnect(&self) {
        self.server.disconnect().await;
    }

    pub async fn peer_count(&self) -> usize {
        self.server.peer_count().await
    }

    pub async fn records(&self) -> Vec<Record> {
        self.coordinator.records().await
    }

    pub async fn columns(&self) -> Vec<String> {
        self.coordinator.columns().await
    }

    pub async fn timer(&self) -> (TimerValue, TimerState) {
        self.coordinator.timer().await
    }

    pub fn server(&self) -> &CoordinatorServer {
        &self.server
    }
}

impl Drop for CoordinatorNode {
    fn drop(&mut self) {
        self.dispatch.abort();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
