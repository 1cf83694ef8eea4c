//! The peer's `DATA:` / `CONFIRM` handshake.
//!
//! At most one transfer is outstanding at a time.  Each transfer resolves
//! exactly once, to whichever of these happens first:
//!
//! - `CONFIRM` arrives: [`TransferOutcome::Confirmed`]
//! - the confirm timeout elapses: [`TransferOutcome::TimedOut`]
//! - the connection drops: [`TransferOutcome::Disconnected`]
//!
//! A timed-out transfer is not retried.

use std::sync::Arc;
use std::time::Duration;

use gridsync_core::{encode_message, RecordPayload, SyncMessage};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::AbortHandle;
use tokio::time;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::handle_messages::{LineSender, PeerEvent};

/// How long a transfer waits for `CONFIRM` unless configured otherwise.
pub const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(5);

/// How a transfer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Confirmed,
    TimedOut,
    Disconnected,
}

impl TransferOutcome {
    /// Human-readable status line for this outcome.
    pub fn status_text(self) -> &'static str {
        match self {
            TransferOutcome::Confirmed => "Data received by server.",
            TransferOutcome::TimedOut => "Data send timed out, no confirmation received.",
            TransferOutcome::Disconnected => "Disconnected while awaiting confirmation.",
        }
    }
}

/// Reasons a transfer could not be started.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("Please wait for previous data confirmation.")]
    AlreadyInProgress,

    #[error("Cannot send data: No record selected or not connected.")]
    NotConnected,

    #[error("Cannot send data: No record selected or not connected.")]
    NoRecordSelected,

    #[error("Error sending data: {0}")]
    Send(String),
}

/// Snapshot of the handshake state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    AwaitingConfirmation { id: Uuid, payload: RecordPayload },
}

/// Handle to one in-flight transfer.
///
/// Dropping it does not cancel the transfer; the outcome is still reported as
/// a [`PeerEvent::TransferResolved`].
#[derive(Debug)]
pub struct PendingTransfer {
    id: Uuid,
    outcome: oneshot::Receiver<TransferOutcome>,
}

impl PendingTransfer {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Waits for the transfer to resolve.
    pub async fn outcome(self) -> TransferOutcome {
        // The tracker always sends before dropping its half.
        self.outcome.await.unwrap_or(TransferOutcome::Disconnected)
    }
}

struct Outstanding {
    id: Uuid,
    payload: RecordPayload,
    notify: oneshot::Sender<TransferOutcome>,
    deadline: Option<AbortHandle>,
}

struct Inner {
    sender: Arc<dyn LineSender>,
    events: mpsc::Sender<PeerEvent>,
    confirm_timeout: Duration,
    outstanding: Mutex<Option<Outstanding>>,
}

/// Owns the single pending transfer and its timeout.
#[derive(Clone)]
pub struct TransferTracker {
    inner: Arc<Inner>,
}

impl TransferTracker {
    pub fn new(
        sender: Arc<dyn LineSender>,
        events: mpsc::Sender<PeerEvent>,
        confirm_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sender,
                events,
                confirm_timeout,
                outstanding: Mutex::new(None),
            }),
        }
    }

    pub fn confirm_timeout(&self) -> Duration {
        self.inner.confirm_timeout
    }

    /// Transmits `payload` as `DATA:` and starts waiting for `CONFIRM`.
    ///
    /// # Errors
    ///
    /// - [`TransferError::AlreadyInProgress`] if a transfer is outstanding;
    ///   that transfer is left untouched.
    /// - [`TransferError::NotConnected`] if there is no connection.
    /// - [`TransferError::Send`] if the write fails; the state is cleared.
    pub async fn begin(&self, payload: RecordPayload) -> Result<PendingTransfer, TransferError> {
        // Held until the deadline is armed, so a fast CONFIRM waits for us.
        let mut outstanding = self.inner.outstanding.lock().await;
        if outstanding.is_some() {
            return Err(TransferError::AlreadyInProgress);
        }
        if !self.inner.sender.is_connected().await {
            return Err(TransferError::NotConnected);
        }

        let line = encode_message(&SyncMessage::Data(payload.clone()))
            .map_err(|e| TransferError::Send(e.to_string()))?;
        let id = Uuid::new_v4();
        let (notify, outcome) = oneshot::channel();
        *outstanding = Some(Outstanding {
            id,
            payload,
            notify,
            deadline: None,
        });

        if let Err(e) = self.inner.sender.send_line(&line).await {
            warn!("transfer {id} could not be sent: {e}");
            *outstanding = None;
            return Err(TransferError::Send(e));
        }
        info!("transfer {id} sent, awaiting confirmation");
        self.emit(PeerEvent::Status(
            "Data sent, awaiting confirmation.".to_string(),
        ))
        .await;

        let this = self.clone();
        let wait = self.inner.confirm_timeout;
        let deadline = tokio::spawn(async move {
            time::sleep(wait).await;
            this.resolve(Some(id), TransferOutcome::TimedOut).await;
        });
        if let Some(entry) = outstanding.as_mut() {
            entry.deadline = Some(deadline.abort_handle());
        }

        Ok(PendingTransfer { id, outcome })
    }

    /// Inbound `CONFIRM`.  Returns `false` if nothing was outstanding.
    pub async fn confirm(&self) -> bool {
        self.resolve(None, TransferOutcome::Confirmed).await
    }

    /// Connection lost.  Returns `false` if nothing was outstanding.
    pub async fn abandon(&self) -> bool {
        self.resolve(None, TransferOutcome::Disconnected).await
    }

    pub async fn is_pending(&self) -> bool {
        self.inner.outstanding.lock().await.is_some()
    }

    pub async fn state(&self) -> TransferState {
        match self.inner.outstanding.lock().await.as_ref() {
            Some(entry) => TransferState::AwaitingConfirmation {
                id: entry.id,
                payload: entry.payload.clone(),
            },
            None => TransferState::Idle,
        }
    }

    /// Clears the outstanding transfer and reports `outcome`.
    ///
    /// With `only = Some(id)` nothing happens unless `id` is still the
    /// outstanding transfer.
    async fn resolve(&self, only: Option<Uuid>, outcome: TransferOutcome) -> bool {
        let taken = {
            let mut outstanding = self.inner.outstanding.lock().await;
            match outstanding.as_ref() {
                Some(entry) if only.map_or(true, |id| id == entry.id) => outstanding.take(),
                _ => None,
            }
        };
        let Some(entry) = taken else {
            return false;
        };

        // The deadline task itself resolves with TimedOut and must not abort
        // itself mid-report.
        if outcome != TransferOutcome::TimedOut {
            if let Some(deadline) = &entry.deadline {
                deadline.abort();
            }
        }
        match outcome {
            TransferOutcome::Confirmed => info!("transfer {} confirmed", entry.id),
            TransferOutcome::TimedOut => warn!(
                "transfer {} timed out after {:?}",
                entry.id, self.inner.confirm_timeout
            ),
            TransferOutcome::Disconnected => warn!("transfer {} abandoned on disconnect", entry.id),
        }

        if entry.notify.send(outcome).is_err() {
            debug!("transfer {} handle was dropped", entry.id);
        }
        self.emit(PeerEvent::TransferResolved(outcome)).await;
        self.emit(PeerEvent::Status(outcome.status_text().to_string()))
            .await;
        true
    }

    async fn emit(&self, event: PeerEvent) {
        let _ = self.inner.events.send(event).await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::handle_messages::MockLineSender;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingSender {
        lines: StdMutex<Vec<String>>,
        offline: AtomicBool,
    }

    impl RecordingSender {
        fn lines(&self) -> Vec<String> {
            self.lines.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LineSender for RecordingSender {
        async fn send_line(&self, line: &str) -> Result<(), String> {
            self.lines.lock().unwrap().push(line.to_string());
            Ok(())
        }

        async fn is_connected(&self) -> bool {
            !self.offline.load(Ordering::SeqCst)
        }
    }

    fn sample_payload() -> RecordPayload {
        RecordPayload::new(["X"], [("X", "1")])
    }

    fn make_tracker(
        timeout: Duration,
    ) -> (
        TransferTracker,
        Arc<RecordingSender>,
        mpsc::Receiver<PeerEvent>,
    ) {
        let sender = Arc::new(RecordingSender::default());
        let (tx, rx) = mpsc::channel(64);
        let tracker = TransferTracker::new(Arc::clone(&sender) as Arc<dyn LineSender>, tx, timeout);
        (tracker, sender, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<PeerEvent>) -> Vec<PeerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn resolutions(events: &[PeerEvent]) -> Vec<TransferOutcome> {
        events
            .iter()
            .filter_map(|e| match e {
                PeerEvent::TransferResolved(outcome) => Some(*outcome),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_begin_sends_data_line_and_reports_status() {
        // Arrange
        let (tracker, sender, mut rx) = make_tracker(DEFAULT_CONFIRM_TIMEOUT);

        // Act
        let pending = tracker.begin(sample_payload()).await.unwrap();

        // Assert
        assert_eq!(
            sender.lines(),
            vec![r#"DATA:{"Columns":["X"],"Record":{"X":"1"}}"#]
        );
        assert_eq!(
            tracker.state().await,
            TransferState::AwaitingConfirmation {
                id: pending.id(),
                payload: sample_payload()
            }
        );
        assert_eq!(
            drain(&mut rx),
            vec![PeerEvent::Status(
                "Data sent, awaiting confirmation.".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_confirm_resolves_pending_transfer() {
        // Arrange
        let (tracker, _sender, mut rx) = make_tracker(DEFAULT_CONFIRM_TIMEOUT);
        let pending = tracker.begin(sample_payload()).await.unwrap();

        // Act
        let matched = tracker.confirm().await;

        // Assert
        assert!(matched);
        assert_eq!(pending.outcome().await, TransferOutcome::Confirmed);
        assert_eq!(tracker.state().await, TransferState::Idle);
        let events = drain(&mut rx);
        assert_eq!(resolutions(&events), vec![TransferOutcome::Confirmed]);
        assert_eq!(
            events.last(),
            Some(&PeerEvent::Status("Data received by server.".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_confirm_times_out_after_five_seconds() {
        // Arrange
        let (tracker, _sender, mut rx) = make_tracker(DEFAULT_CONFIRM_TIMEOUT);
        let pending = tracker.begin(sample_payload()).await.unwrap();

        // Act / Assert – still waiting just before the deadline
        time::sleep(Duration::from_millis(4_900)).await;
        assert!(tracker.is_pending().await);

        let outcome = pending.outcome().await;

        assert_eq!(outcome, TransferOutcome::TimedOut);
        assert!(!tracker.is_pending().await);
        let events = drain(&mut rx);
        assert_eq!(resolutions(&events), vec![TransferOutcome::TimedOut]);
        assert!(events.contains(&PeerEvent::Status(
            "Data send timed out, no confirmation received.".to_string()
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_timeout_is_honoured() {
        let (tracker, _sender, _rx) = make_tracker(Duration::from_secs(1));
        let pending = tracker.begin(sample_payload()).await.unwrap();

        time::sleep(Duration::from_millis(1_100)).await;

        assert!(!tracker.is_pending().await);
        assert_eq!(pending.outcome().await, TransferOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_begin_while_pending_is_rejected() {
        // Arrange
        let (tracker, sender, _rx) = make_tracker(DEFAULT_CONFIRM_TIMEOUT);
        let first = tracker.begin(sample_payload()).await.unwrap();

        // Act
        let second = tracker
            .begin(RecordPayload::new(["Y"], [("Y", "2")]))
            .await;

        // Assert – the first transfer is unaffected
        assert_eq!(second.unwrap_err(), TransferError::AlreadyInProgress);
        assert_eq!(sender.lines().len(), 1);
        assert!(tracker.confirm().await);
        assert_eq!(first.outcome().await, TransferOutcome::Confirmed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirm_after_timeout_is_unexpected() {
        let (tracker, _sender, mut rx) = make_tracker(DEFAULT_CONFIRM_TIMEOUT);
        let pending = tracker.begin(sample_payload()).await.unwrap();
        assert_eq!(pending.outcome().await, TransferOutcome::TimedOut);

        let matched = tracker.confirm().await;

        assert!(!matched);
        assert_eq!(
            resolutions(&drain(&mut rx)),
            vec![TransferOutcome::TimedOut],
            "exactly one outcome per transfer"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_transfer_never_times_out() {
        let (tracker, _sender, mut rx) = make_tracker(DEFAULT_CONFIRM_TIMEOUT);
        let _pending = tracker.begin(sample_payload()).await.unwrap();
        tracker.confirm().await;

        time::sleep(Duration::from_secs(10)).await;

        assert_eq!(
            resolutions(&drain(&mut rx)),
            vec![TransferOutcome::Confirmed]
        );
    }

    #[tokio::test]
    async fn test_abandon_resolves_disconnected() {
        let (tracker, _sender, mut rx) = make_tracker(DEFAULT_CONFIRM_TIMEOUT);
        let pending = tracker.begin(sample_payload()).await.unwrap();

        assert!(tracker.abandon().await);

        assert_eq!(pending.outcome().await, TransferOutcome::Disconnected);
        assert!(drain(&mut rx).contains(&PeerEvent::Status(
            "Disconnected while awaiting confirmation.".to_string()
        )));
    }

    #[tokio::test]
    async fn test_abandon_with_nothing_pending_reports_nothing() {
        let (tracker, _sender, mut rx) = make_tracker(DEFAULT_CONFIRM_TIMEOUT);

        assert!(!tracker.abandon().await);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_begin_when_disconnected_leaves_state_idle() {
        // Arrange
        let mut mock = MockLineSender::new();
        mock.expect_is_connected().returning(|| false);
        mock.expect_send_line().never();
        let (tx, _rx) = mpsc::channel(8);
        let tracker = TransferTracker::new(Arc::new(mock), tx, DEFAULT_CONFIRM_TIMEOUT);

        // Act
        let result = tracker.begin(sample_payload()).await;

        // Assert
        assert_eq!(result.unwrap_err(), TransferError::NotConnected);
        assert_eq!(tracker.state().await, TransferState::Idle);
    }

    #[tokio::test]
    async fn test_write_failure_clears_state_and_returns_send_error() {
        let mut mock = MockLineSender::new();
        mock.expect_is_connected().returning(|| true);
        mock.expect_send_line()
            .times(1)
            .returning(|_| Err("broken pipe".to_string()));
        let (tx, mut rx) = mpsc::channel(8);
        let tracker = TransferTracker::new(Arc::new(mock), tx, DEFAULT_CONFIRM_TIMEOUT);

        let result = tracker.begin(sample_payload()).await;

        assert_eq!(
            result.unwrap_err(),
            TransferError::Send("broken pipe".to_string())
        );
        assert!(!tracker.is_pending().await);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_transfer_error_messages() {
        assert_eq!(
            TransferError::AlreadyInProgress.to_string(),
            "Please wait for previous data confirmation."
        );
        assert_eq!(
            TransferError::Send("x".to_string()).to_string(),
            "Error sending data: x"
        );
    }
}
