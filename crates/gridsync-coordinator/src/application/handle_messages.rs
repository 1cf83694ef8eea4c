//! Coordinator message router and countdown ticker.
//!
//! [`SyncCoordinator`] is driven by a single dispatch task (see
//! [`SyncCoordinator::run`]) that consumes [`TransportEvent`]s in arrival
//! order.  Per inbound line:
//!
//! | Line        | Local effect                              | Reply / rebroadcast        |
//! |-------------|-------------------------------------------|----------------------------|
//! | `DATA:`     | merge columns, append record              | `CONFIRM` to origin only   |
//! | bad `DATA:` | status event                              | `CONFIRM` to origin only   |
//! | `TIMER:`    | adopt value, start ticker if idle         | same line to all but origin|
//! | `STOP`      | halt countdown                            | `STOP` to all              |
//! | `RESET`     | zero countdown                            | `RESET` to all             |
//! | `CONFIRM`   | none                                      | none                       |
//!
//! While the countdown ticks, the ticker task sends the new value to every
//! connection once per second and one final `TIMER:00:00:00` when it reaches
//! zero.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gridsync_core::{
    decode_line, encode_message, protocol::classify, Countdown, MessageKind, Record,
    RecordPayload, RecordTable, SendTarget, SessionId, SyncMessage, TickOutcome, TimerState,
    TimerValue,
};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

/// Interval between countdown decrements.
pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Outbound side of the coordinator's transport.
///
/// The TCP listener implements this; tests use a recording double.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Writes `line` followed by `\n` to every connection addressed by
    /// `target` and returns how many received it.
    async fn broadcast(&self, line: &str, target: SendTarget) -> Result<usize, String>;
}

/// Inbound side of the transport, delivered to the dispatch task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    StateChanged {
        connected: bool,
        message: String,
        peer_count: usize,
    },
    LineReceived {
        origin: SessionId,
        line: String,
    },
}

/// Events raised to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorEvent {
    ConnectionStateChanged {
        connected: bool,
        message: String,
        peer_count: usize,
    },
    MessageReceived {
        message: String,
        origin: Option<SessionId>,
    },
    RecordAppended {
        index: usize,
        record: Record,
    },
    TimerChanged {
        value: TimerValue,
        state: TimerState,
    },
    Status(String),
}

struct Inner {
    broadcaster: Arc<dyn Broadcaster>,
    events: mpsc::Sender<CoordinatorEvent>,
    table: Mutex<RecordTable>,
    countdown: Mutex<Countdown>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

/// The coordinator's record table, countdown and routing rules.
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

impl SyncCoordinator {
    pub fn new(broadcaster: Arc<dyn Broadcaster>, events: mpsc::Sender<CoordinatorEvent>) -> Self {
        Self {
            inner: Arc::new(Inner {
                broadcaster,
                events,
                table: Mutex::new(RecordTable::new()),
                countdown: Mutex::new(Countdown::new()),
                ticker: Mutex::new(None),
            }),
        }
    }

    /// Dispatch loop.  Runs until every transport sender is dropped.
    pub async fn run(self, mut transport: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = transport.recv().await {
            self.handle_transport_event(event).await;
        }
        debug!("transport channel closed, dispatch task exiting");
        self.stop_ticker().await;
    }

    pub async fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::StateChanged {
                connected,
                message,
                peer_count,
            } => {
                self.emit(CoordinatorEvent::ConnectionStateChanged {
                    connected,
                    message,
                    peer_count,
                })
                .await;
                // Server stopped or failed.
                if !connected {
                    self.reset_local_timer().await;
                }
            }
            TransportEvent::LineReceived { origin, line } => self.handle_line(origin, &line).await,
        }
    }

    /// Routes one inbound line from `origin`.
    pub async fn handle_line(&self, origin: SessionId, line: &str) {
        self.emit(CoordinatorEvent::MessageReceived {
            message: line.to_string(),
            origin: Some(origin),
        })
        .await;

        let Some(kind) = classify(line) else {
            debug!("ignoring unrecognised line from session {origin}");
            return;
        };

        match decode_line(line) {
            Ok(Some(SyncMessage::Data(payload))) => self.on_data(origin, payload).await,
            Ok(Some(SyncMessage::Timer(value))) => self.on_timer(origin, value, line).await,
            Ok(Some(SyncMessage::Stop)) => self.on_stop().await,
            Ok(Some(SyncMessage::Reset)) => self.on_reset().await,
            Ok(Some(SyncMessage::Confirm)) => debug!("ignoring CONFIRM from session {origin}"),
            Ok(None) => {}
            Err(e) => {
                warn!("malformed {} line from session {origin}: {e}", kind.name());
                if kind == MessageKind::Data {
                    self.emit(CoordinatorEvent::Status(format!("Error processing data: {e}")))
                        .await;
                    // The sender is waiting on this even though nothing was stored.
                    self.send(&SyncMessage::Confirm, SendTarget::One(origin))
                        .await;
                }
            }
        }
    }

    // ── Snapshots ─────────────────────────────────────────────────────────────

    pub async fn records(&self) -> Vec<Record> {
        self.inner.table.lock().await.records().to_vec()
    }

    pub async fn columns(&self) -> Vec<String> {
        self.inner.table.lock().await.columns().to_vec()
    }

    /// Every record projected onto the current column set.
    pub async fn rows(&self) -> Vec<Vec<String>> {
        self.inner.table.lock().await.rows()
    }

    pub async fn timer(&self) -> (TimerValue, TimerState) {
        let countdown = self.inner.countdown.lock().await;
        (countdown.value(), countdown.state())
    }

    // ── Handlers ──────────────────────────────────────────────────────────────

    async fn on_data(&self, origin: SessionId, payload: RecordPayload) {
        let record = Record::from_payload(payload);
        let index = self.inner.table.lock().await.append(record.clone());
        info!(
            "appended record {index} ({} columns) from session {origin}",
            record.columns().len()
        );
        self.emit(CoordinatorEvent::RecordAppended { index, record })
            .await;
        self.send(&SyncMessage::Confirm, SendTarget::One(origin))
            .await;
    }

    async fn on_timer(&self, origin: SessionId, value: TimerValue, line: &str) {
        let state = {
            let mut countdown = self.inner.countdown.lock().await;
            if countdown.adopt_running(value) {
                info!("countdown started at {value} by session {origin}");
                self.spawn_ticker().await;
            } else if !countdown.is_ticking() {
                self.stop_ticker().await;
            }
            countdown.state()
        };
        self.emit(CoordinatorEvent::TimerChanged { value, state })
            .await;
        self.send_raw(line, SendTarget::AllExcept(origin)).await;
    }

    async fn on_stop(&self) {
        let (value, state) = {
            let mut countdown = self.inner.countdown.lock().await;
            countdown.halt();
            self.stop_ticker().await;
            (countdown.value(), countdown.state())
        };
        info!("countdown stopped at {value}");
        self.emit(CoordinatorEvent::TimerChanged { value, state })
            .await;
        self.send(&SyncMessage::Stop, SendTarget::All).await;
    }

    async fn on_reset(&self) {
        self.reset_local_timer().await;
        self.send(&SyncMessage::Reset, SendTarget::All).await;
    }

    async fn reset_local_timer(&self) {
        let (value, state) = {
            let mut countdown = self.inner.countdown.lock().await;
            self.stop_ticker().await;
            countdown.reset();
            (countdown.value(), countdown.state())
        };
        self.emit(CoordinatorEvent::TimerChanged { value, state })
            .await;
    }

    // ── Ticker ────────────────────────────────────────────────────────────────

    async fn spawn_ticker(&self) {
        let this = self.clone();
        let handle = tokio::spawn(async move { this.run_ticker().await });
        if let Some(previous) = self.inner.ticker.lock().await.replace(handle) {
            previous.abort();
        }
    }

    async fn stop_ticker(&self) {
        if let Some(handle) = self.inner.ticker.lock().await.take() {
            handle.abort();
        }
    }

    async fn run_ticker(self) {
        let mut interval = time::interval(TICK_PERIOD);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            let (outcome, state) = {
                let mut countdown = self.inner.countdown.lock().await;
                let outcome = countdown.tick();
                (outcome, countdown.state())
            };
            match outcome {
                TickOutcome::Idle => return,
                TickOutcome::Running(value) => {
                    self.emit(CoordinatorEvent::TimerChanged { value, state })
                        .await;
                    self.send(&SyncMessage::Timer(value), SendTarget::All)
                        .await;
                }
                TickOutcome::Finished => {
                    info!("countdown finished");
                    let value = TimerValue::ZERO;
                    self.emit(CoordinatorEvent::TimerChanged { value, state })
                        .await;
                    self.send(&SyncMessage::Timer(value), SendTarget::All)
                        .await;
                    return;
                }
            }
        }
    }

    // ── Output ────────────────────────────────────────────────────────────────

    async fn send(&self, msg: &SyncMessage, target: SendTarget) {
        match encode_message(msg) {
            Ok(line) => self.send_raw(&line, target).await,
            Err(e) => warn!("failed to encode {}: {e}", msg.kind().name()),
        }
    }

    async fn send_raw(&self, line: &str, target: SendTarget) {
        if let Err(e) = self.inner.broadcaster.broadcast(line, target).await {
            debug!("{target:?} not reached: {e}");
        }
    }

    async fn emit(&self, event: CoordinatorEvent) {
        // A dropped receiver only means nobody is watching.
        let _ = self.inner.events.send(event).await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
