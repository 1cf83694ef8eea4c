//! PeerNode: wires the TCP connection to the peer use case.
//!
//! ```text
//!  PeerConnection ──TransportEvent──► dispatch task ──► PeerClient
//!        ▲                                                 │
//!        └────────────── LineSender::send_line ◄───────────┘
//!                                                          │
//!                                           PeerEvent ◄────┘  (to the UI)
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::application::handle_messages::{LineSender, PeerClient, PeerEvent};
use crate::infrastructure::network::{PeerConnection, PeerNetworkError};

/// Capacity of the channel carrying [`PeerEvent`]s to the UI.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A peer: connection, dispatch task and local state.
pub struct PeerNode {
    connection: PeerConnection,
    client: PeerClient,
    dispatch: JoinHandle<()>,
}

impl PeerNode {
    /// Creates a disconnected node and the receiver for its UI events.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(confirm_timeout: Duration) -> (Self, mpsc::Receiver<PeerEvent>) {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let connection = PeerConnection::new(transport_tx);
        let sender: Arc<dyn LineSender> = Arc::new(connection.clone());
        let client = PeerClient::new(sender, event_tx, confirm_timeout);
        let dispatch = tokio::spawn(client.clone().run(transport_rx));

        (
            Self {
                connection,
                client,
                dispatch,
            },
            event_rx,
        )
    }

    /// Connects to the coordinator; see [`PeerConnection::connect`].
    ///
    /// # Errors
    ///
    /// Propagates [`PeerNetworkError`] from the connection.
    pub async fn connect(&self, host: &str, port: u16) -> Result<SocketAddr, PeerNetworkError> {
        self.connection.connect(host, port).await
    }

    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.is_connected().await
    }

    pub fn client(&self) -> &PeerClient {
        &self.client
    }

    pub fn connection(&self) -> &PeerConnection {
        &self.connection
    }
}

impl Drop for PeerNode {
    fn drop(&mut self) {
        self.dispatch.abort();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
