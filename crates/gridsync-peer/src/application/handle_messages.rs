//! Peer message router and command surface.
//!
//! Inbound lines from the coordinator:
//!
//! | Line      | Effect                                                     |
//! |-----------|------------------------------------------------------------|
//! | `CONFIRM` | resolves the pending transfer, or reports it as unexpected |
//! | `TIMER:`  | adopts the value; a differing value stops a local ticker   |
//! | `STOP`    | stops the countdown, keeping its value                     |
//! | `RESET`   | zeros the countdown                                        |
//! | `DATA:`   | ignored                                                    |
//!
//! Losing the connection resets the countdown and resolves any pending
//! transfer as disconnected.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gridsync_core::{
    decode_line, protocol::classify, Record, RecordTable, SessionId, StopOutcome, SyncMessage,
    TimerError, TimerState, TimerValue,
};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::application::timer_control::TimerControl;
use crate::application::transfer::{
    PendingTransfer, TransferError, TransferOutcome, TransferState, TransferTracker,
};

/// Outbound side of the peer's single connection.
///
/// The TCP connection implements this; tests use a recording double.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LineSender: Send + Sync {
    /// Writes `line` followed by `\n` to the coordinator.
    async fn send_line(&self, line: &str) -> Result<(), String>;

    async fn is_connected(&self) -> bool;
}

/// Inbound side of the transport, delivered to the dispatch task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    StateChanged {
        connected: bool,
        message: String,
        peer_count: usize,
    },
    LineReceived(String),
}

/// Events raised to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    ConnectionStateChanged {
        connected: bool,
        message: String,
        peer_count: usize,
    },
    /// `origin` is always `None` on a peer.
    MessageReceived {
        message: String,
        origin: Option<SessionId>,
    },
    TimerChanged {
        value: TimerValue,
        state: TimerState,
    },
    Status(String),
    TransferResolved(TransferOutcome),
}

struct Inner {
    events: mpsc::Sender<PeerEvent>,
    table: Mutex<RecordTable>,
    timer: TimerControl,
    transfer: TransferTracker,
    connected: AtomicBool,
}

/// The peer's local grid, countdown copy and pending transfer.
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct PeerClient {
    inner: Arc<Inner>,
}

impl PeerClient {
    pub fn new(
        sender: Arc<dyn LineSender>,
        events: mpsc::Sender<PeerEvent>,
        confirm_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                timer: TimerControl::new(Arc::clone(&sender), events.clone()),
                transfer: TransferTracker::new(sender, events.clone(), confirm_timeout),
                events,
                table: Mutex::new(RecordTable::new()),
                connected: AtomicBool::new(false),
            }),
        }
    }

    /// Dispatch loop.  Runs until every transport sender is dropped.
    pub async fn run(self, mut transport: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = transport.recv().await {
            self.handle_transport_event(event).await;
        }
        debug!("transport channel closed, dispatch task exiting");
        self.inner.timer.reset_local().await;
    }

    pub async fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::StateChanged {
                connected,
                message,
                peer_count,
            } => {
                let was_connected = self.inner.connected.swap(connected, Ordering::SeqCst);
                self.emit(PeerEvent::ConnectionStateChanged {
                    connected,
                    message,
                    peer_count,
                })
                .await;
                if was_connected && !connected {
                    self.inner.timer.reset_local().await;
                    self.inner.transfer.abandon().await;
                }
            }
            TransportEvent::LineReceived(line) => self.handle_line(&line).await,
        }
    }

    /// Routes one inbound line from the coordinator.
    pub async fn handle_line(&self, line: &str) {
        self.emit(PeerEvent::MessageReceived {
            message: line.to_string(),
            origin: None,
        })
        .await;

        let Some(kind) = classify(line) else {
            debug!("ignoring unrecognised line from coordinator");
            return;
        };

        match decode_line(line) {
            Ok(Some(SyncMessage::Confirm)) => {
                if !self.inner.transfer.confirm().await {
                    self.status("Received unexpected CONFIRM message.").await;
                }
            }
            Ok(Some(SyncMessage::Timer(value))) => self.inner.timer.adopt(value).await,
            Ok(Some(SyncMessage::Stop)) => self.inner.timer.halt().await,
            Ok(Some(SyncMessage::Reset)) => self.inner.timer.reset_local().await,
            Ok(Some(SyncMessage::Data(_))) => debug!("ignoring DATA from coordinator"),
            Ok(None) => {}
            Err(e) => warn!("malformed {} line from coordinator: {e}", kind.name()),
        }
    }

    // ── Grid ──────────────────────────────────────────────────────────────────

    /// Adds column names to the local grid; returns how many were new.
    pub async fn add_columns(&self, columns: &[String]) -> usize {
        self.inner.table.lock().await.merge_columns(columns)
    }

    /// Appends `record` to the local grid, adopting any new columns.
    pub async fn add_record(&self, record: Record) -> usize {
        self.inner.table.lock().await.append(record)
    }

    pub async fn columns(&self) -> Vec<String> {
        self.inner.table.lock().await.columns().to_vec()
    }

    pub async fn records(&self) -> Vec<Record> {
        self.inner.table.lock().await.records().to_vec()
    }

    pub async fn rows(&self) -> Vec<Vec<String>> {
        self.inner.table.lock().await.rows()
    }

    // ── Transfer ──────────────────────────────────────────────────────────────

    /// Sends grid row `index` under the grid's column order.
    ///
    /// # Errors
    ///
    /// [`TransferError::NoRecordSelected`] for an unknown row, otherwise see
    /// [`TransferTracker::begin`].  Every error is also reported as a status.
    pub async fn send_row(&self, index: usize) -> Result<PendingTransfer, TransferError> {
        let payload = self.inner.table.lock().await.payload_for(index);
        let result = match payload {
            Some(payload) => self.inner.transfer.begin(payload).await,
            None => Err(TransferError::NoRecordSelected),
        };
        if let Err(e) = &result {
            self.status(e.to_string()).await;
        }
        result
    }

    pub async fn transfer_state(&self) -> TransferState {
        self.inner.transfer.state().await
    }

    // ── Timer ─────────────────────────────────────────────────────────────────

    pub async fn set_timer(&self, value: TimerValue) {
        self.inner.timer.set(value).await;
    }

    pub async fn start_timer(&self) -> Result<TimerValue, TimerError> {
        let result = self.inner.timer.start().await;
        self.report_timer_error(&result).await;
        result
    }

    pub async fn resume_timer(&self) -> Result<TimerValue, TimerError> {
        let result = self.inner.timer.resume().await;
        self.report_timer_error(&result).await;
        result
    }

    pub async fn stop_timer(&self) -> Result<StopOutcome, TimerError> {
        let result = self.inner.timer.stop().await;
        self.report_timer_error(&result).await;
        result
    }

    pub async fn reset_timer(&self) {
        self.inner.timer.reset().await;
    }

    pub async fn timer(&self) -> (TimerValue, TimerState) {
        self.inner.timer.snapshot().await
    }

    // ── Output ────────────────────────────────────────────────────────────────

    async fn report_timer_error<T>(&self, result: &Result<T, TimerError>) {
        if let Err(e) = result {
            self.status(e.to_string()).await;
        }
    }

    async fn status(&self, text: impl Into<String>) {
        self.emit(PeerEvent::Status(text.into())).await;
    }

    async fn emit(&self, event: PeerEvent) {
        // A dropped receiver only means nobody is watching.
        let _ = self.inner.events.send(event).await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
