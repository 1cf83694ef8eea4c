//! The peer's copy of the shared countdown.
//!
//! A peer only ticks when it started (or resumed) the countdown itself; it
//! then transmits every new value.  Values received from the coordinator are
//! adopted without ticking, so a second decrement loop never runs alongside
//! the one that owns the countdown.

use std::sync::Arc;
use std::time::Duration;

use gridsync_core::{
    encode_message, Countdown, StopOutcome, SyncMessage, TickOutcome, TimerError, TimerState,
    TimerValue,
};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use crate::application::handle_messages::{LineSender, PeerEvent};

/// Interval between countdown decrements.
pub const TICK_PERIOD: Duration = Duration::from_secs(1);

struct Inner {
    sender: Arc<dyn LineSender>,
    events: mpsc::Sender<PeerEvent>,
    countdown: Mutex<Countdown>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

/// Local timer commands plus the inbound `TIMER:`/`STOP`/`RESET` transitions.
#[derive(Clone)]
pub struct TimerControl {
    inner: Arc<Inner>,
}

impl TimerControl {
    pub fn new(sender: Arc<dyn LineSender>, events: mpsc::Sender<PeerEvent>) -> Self {
        Self {
            inner: Arc::new(Inner {
                sender,
                events,
                countdown: Mutex::new(Countdown::new()),
                ticker: Mutex::new(None),
            }),
        }
    }

    pub async fn snapshot(&self) -> (TimerValue, TimerState) {
        let countdown = self.inner.countdown.lock().await;
        (countdown.value(), countdown.state())
    }

    // ── Local commands ────────────────────────────────────────────────────────

    /// Stores a user-entered value and stops any local ticker.
    pub async fn set(&self, value: TimerValue) {
        let state = {
            let mut countdown = self.inner.countdown.lock().await;
            self.stop_ticker().await;
            countdown.set(value);
            countdown.state()
        };
        self.emit(PeerEvent::TimerChanged { value, state }).await;
    }

    /// Starts ticking locally and transmits the starting value.
    ///
    /// # Errors
    ///
    /// - [`TimerError::NotConnected`] without a connection.
    /// - [`TimerError::NothingToStart`] if the value is zero.
    /// - [`TimerError::AlreadyTicking`] if already ticking.
    pub async fn start(&self) -> Result<TimerValue, TimerError> {
        self.begin_ticking(false).await
    }

    /// Same as [`TimerControl::start`], from `Stopped`.
    pub async fn resume(&self) -> Result<TimerValue, TimerError> {
        self.begin_ticking(true).await
    }

    /// Stops the local ticker, or asks the coordinator to stop whoever ticks.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::NotRunning`] when nothing ticks locally and there
    /// is either no value or no connection.
    pub async fn stop(&self) -> Result<StopOutcome, TimerError> {
        let connected = self.inner.sender.is_connected().await;
        let outcome = {
            let mut countdown = self.inner.countdown.lock().await;
            let outcome = countdown.stop(connected)?;
            if matches!(outcome, StopOutcome::Stopped(_)) {
                self.stop_ticker().await;
            }
            outcome
        };

        match outcome {
            StopOutcome::Stopped(value) => {
                info!("countdown stopped locally at {value}");
                self.emit(PeerEvent::TimerChanged {
                    value,
                    state: TimerState::Stopped,
                })
                .await;
                self.status("Timer stopped.").await;
            }
            StopOutcome::DelegateToRemote(value) => {
                debug!("not ticking locally, requesting remote stop at {value}");
                match self.send(&SyncMessage::Stop).await {
                    Ok(()) => self.status("Timer stop requested.").await,
                    Err(e) => self.status(format!("Error sending stop message: {e}")).await,
                }
            }
        }
        Ok(outcome)
    }

    /// Zeros the countdown and, if connected, tells everyone else to.
    pub async fn reset(&self) {
        self.reset_local().await;
        if !self.inner.sender.is_connected().await {
            return;
        }
        match self.send(&SyncMessage::Reset).await {
            Ok(()) => self.status("Timer reset sent.").await,
            Err(e) => self.status(format!("Error sending reset message: {e}")).await,
        }
    }

    // ── Inbound transitions ───────────────────────────────────────────────────

    /// Inbound `TIMER:`.
    pub async fn adopt(&self, value: TimerValue) {
        let (value, state) = {
            let mut countdown = self.inner.countdown.lock().await;
            if countdown.adopt_remote(value) {
                debug!("remote value {value} differs from local countdown, stopping ticker");
                self.stop_ticker().await;
            }
            (countdown.value(), countdown.state())
        };
        self.emit(PeerEvent::TimerChanged { value, state }).await;
    }

    /// Inbound `STOP`: keep the value, stop ticking.
    pub async fn halt(&self) {
        let (value, state) = {
            let mut countdown = self.inner.countdown.lock().await;
            countdown.halt();
            self.stop_ticker().await;
            (countdown.value(), countdown.state())
        };
        self.emit(PeerEvent::TimerChanged { value, state }).await;
        self.status("Timer stopped by another client.").await;
    }

    /// Inbound `RESET` and disconnects: zero without transmitting.
    pub async fn reset_local(&self) {
        let (value, state) = {
            let mut countdown = self.inner.countdown.lock().await;
            self.stop_ticker().await;
            countdown.reset();
            (countdown.value(), countdown.state())
        };
        self.emit(PeerEvent::TimerChanged { value, state }).await;
    }

    // ── Ticker ────────────────────────────────────────────────────────────────

    async fn begin_ticking(&self, resume: bool) -> Result<TimerValue, TimerError> {
        if !self.inner.sender.is_connected().await {
            return Err(TimerError::NotConnected);
        }
        let value = {
            let mut countdown = self.inner.countdown.lock().await;
            let value = if resume {
                countdown.resume()?
            } else {
                countdown.start()?
            };
            self.spawn_ticker().await;
            value
        };

        info!("countdown started locally at {value}");
        self.emit(PeerEvent::TimerChanged {
            value,
            state: TimerState::Ticking,
        })
        .await;
        if resume {
            self.status("Timer resumed.").await;
        } else {
            self.status("Timer started.").await;
        }
        // A failed first send is reported; the next tick stops the countdown.
        if let Err(e) = self.send(&SyncMessage::Timer(value)).await {
            warn!("failed to transmit starting value {value}: {e}");
            self.status(format!("Error starting timer: {e}")).await;
        }
        Ok(value)
    }

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
            let outcome = self.inner.countdown.lock().await.tick();
            match outcome {
                TickOutcome::Idle => return,
                TickOutcome::Running(value) => {
                    self.emit(PeerEvent::TimerChanged {
                        value,
                        state: TimerState::Ticking,
                    })
                    .await;
                    if !self.inner.sender.is_connected().await {
                        continue;
                    }
                    if let Err(e) = self.send(&SyncMessage::Timer(value)).await {
                        warn!("tick transmission failed, stopping countdown: {e}");
                        let (value, state) = {
                            let mut countdown = self.inner.countdown.lock().await;
                            if countdown.is_ticking() {
                                countdown.halt();
                            }
                            (countdown.value(), countdown.state())
                        };
                        self.emit(PeerEvent::TimerChanged { value, state }).await;
                        self.status(format!("Error sending timer update: {e}"))
                            .await;
                        return;
                    }
                }
                TickOutcome::Finished => {
                    info!("countdown finished");
                    self.emit(PeerEvent::TimerChanged {
                        value: TimerValue::ZERO,
                        state: TimerState::Default,
                    })
                    .await;
                    self.status("Timer finished.").await;
                    if self.inner.sender.is_connected().await {
                        if let Err(e) = self.send(&SyncMessage::Timer(TimerValue::ZERO)).await {
                            debug!("final zero not transmitted: {e}");
                        }
                    }
                    return;
                }
            }
        }
    }

    // ── Output ────────────────────────────────────────────────────────────────

    async fn send(&self, msg: &SyncMessage) -> Result<(), String> {
        let line = encode_message(msg).map_err(|e| e.to_string())?;
        self.inner.sender.send_line(&line).await
    }

    async fn status(&self, text: impl Into<String>) {
        self.emit(PeerEvent::Status(text.into())).await;
    }

    async fn emit(&self, event: PeerEvent) {
        let _ = self.inner.events.send(event).await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
