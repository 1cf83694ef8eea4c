//! End-to-end tests: real coordinator and peers over loopback TCP.

use std::net::SocketAddr;
use std::time::Duration;

use gridsync_coordinator::application::handle_messages::CoordinatorEvent;
use gridsync_coordinator::infrastructure::node::CoordinatorNode;
use gridsync_core::{Record, TimerState, TimerValue};
use gridsync_peer::application::handle_messages::PeerEvent;
use gridsync_peer::application::transfer::{TransferError, TransferOutcome, TransferState};
use gridsync_peer::infrastructure::node::PeerNode;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(5);
const CONFIRM_TIMEOUT: Duration = Duration::from_secs(5);

// ── Helpers ───────────────────────────────────────────────────────────────────

async fn start_coordinator() -> (CoordinatorNode, mpsc::Receiver<CoordinatorEvent>, u16) {
    let (node, events) = CoordinatorNode::new();
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let bound = node.listen(addr).await.expect("listen on loopback");
    (node, events, bound.port())
}

async fn connect_peer(port: u16) -> (PeerNode, mpsc::Receiver<PeerEvent>) {
    let (peer, events) = PeerNode::new(CONFIRM_TIMEOUT);
    peer.connect("127.0.0.1", port).await.expect("peer connects");
    (peer, events)
}

async fn wait_for_peers(coordinator: &CoordinatorNode, expected: usize) {
    timeout(WAIT, async {
        while coordinator.peer_count().await != expected {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("coordinator never saw the expected peer count");
}

/// Returns the first event matching `pred`, skipping the rest.
async fn wait_for_event<F>(rx: &mut mpsc::Receiver<PeerEvent>, pred: F) -> PeerEvent
where
    F: Fn(&PeerEvent) -> bool,
{
    timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => continue,
                None => panic!("peer event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for peer event")
}

fn status_is(text: &'static str) -> impl Fn(&PeerEvent) -> bool {
    move |event| matches!(event, PeerEvent::Status(s) if s == text)
}

// ── Record transfer ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_record_transfer_is_stored_and_confirmed() {
    // Arrange
    let (coordinator, _coordinator_events, port) = start_coordinator().await;
    let (peer, mut events) = connect_peer(port).await;
    wait_for_peers(&coordinator, 1).await;
    let index = peer
        .client()
        .add_record(Record::from_pairs([("X", "1")]))
        .await;

    // Act
    let pending = peer.client().send_row(index).await.expect("send row");
    let outcome = timeout(WAIT, pending.outcome()).await.expect("outcome");

    // Assert
    assert_eq!(outcome, TransferOutcome::Confirmed);
    assert_eq!(peer.client().transfer_state().await, TransferState::Idle);
    let records = coordinator.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].columns(), ["X".to_string()]);
    assert_eq!(records[0].get("X"), Some("1"));
    wait_for_event(&mut events, status_is("Data received by server.")).await;
}

#[tokio::test]
async fn test_coordinator_backfills_columns_across_peers() {
    // Arrange
    let (coordinator, _coordinator_events, port) = start_coordinator().await;
    let (first, _first_events) = connect_peer(port).await;
    let (second, _second_events) = connect_peer(port).await;
    wait_for_peers(&coordinator, 2).await;

    // Act
    let a = first
        .client()
        .add_record(Record::from_pairs([("Name", "Ann"), ("Age", "30")]))
        .await;
    let outcome = first.client().send_row(a).await.unwrap().outcome().await;
    assert_eq!(outcome, TransferOutcome::Confirmed);
    let b = second
        .client()
        .add_record(Record::from_pairs([("Score", "7")]))
        .await;
    let outcome = second.client().send_row(b).await.unwrap().outcome().await;
    assert_eq!(outcome, TransferOutcome::Confirmed);

    // Assert
    assert_eq!(coordinator.columns().await, vec!["Name", "Age", "Score"]);
    let records = coordinator.records().await;
    assert_eq!(records[0].columns(), ["Name".to_string(), "Age".to_string()]);
    assert_eq!(records[1].get("Name"), None);
}

#[tokio::test]
async fn test_unanswered_transfer_times_out_and_blocks_second_send() {
    // Arrange – a coordinator stand-in that reads but never confirms
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let silent = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        let mut received = Vec::new();
        while let Ok(Some(line)) = lines.next_line().await {
            received.push(line);
        }
        received
    });
    let (peer, mut events) = PeerNode::new(Duration::from_millis(300));
    peer.connect("127.0.0.1", port).await.unwrap();
    let index = peer
        .client()
        .add_record(Record::from_pairs([("X", "1")]))
        .await;

    // Act
    let pending = peer.client().send_row(index).await.unwrap();
    let second = peer.client().send_row(index).await;
    let outcome = timeout(WAIT, pending.outcome()).await.unwrap();

    // Assert
    assert_eq!(second.unwrap_err(), TransferError::AlreadyInProgress);
    assert_eq!(outcome, TransferOutcome::TimedOut);
    wait_for_event(
        &mut events,
        status_is("Data send timed out, no confirmation received."),
    )
    .await;

    peer.disconnect().await;
    let received = timeout(WAIT, silent).await.unwrap().unwrap();
    assert_eq!(received.len(), 1, "a timed-out transfer is not retried");
    assert!(received[0].starts_with("DATA:"));
}

// ── Timer replication ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_timer_started_on_one_peer_is_adopted_by_another() {
    // Arrange
    let (coordinator, _coordinator_events, port) = start_coordinator().await;
    let (starter, _starter_events) = connect_peer(port).await;
    let (_follower, mut follower_events) = connect_peer(port).await;
    wait_for_peers(&coordinator, 2).await;

    // Act
    starter.client().set_timer(TimerValue::from_secs(10)).await;
    starter.client().start_timer().await.expect("start");

    // Assert – the follower adopts without ticking
    let adopted = wait_for_event(&mut follower_events, |e| {
        matches!(e, PeerEvent::TimerChanged { value, .. } if *value == TimerValue::from_secs(10))
    })
    .await;
    assert_eq!(
        adopted,
        PeerEvent::TimerChanged {
            value: TimerValue::from_secs(10),
            state: TimerState::Stopped
        }
    );
    assert_eq!(coordinator.timer().await.1, TimerState::Ticking);
}

#[tokio::test]
async fn test_stop_from_idle_peer_is_echoed_to_ticking_peer() {
    // Arrange
    let (coordinator, _coordinator_events, port) = start_coordinator().await;
    let (starter, mut starter_events) = connect_peer(port).await;
    let (follower, mut follower_events) = connect_peer(port).await;
    wait_for_peers(&coordinator, 2).await;
    starter.client().set_timer(TimerValue::from_secs(30)).await;
    starter.client().start_timer().await.unwrap();
    wait_for_event(&mut follower_events, |e| {
        matches!(e, PeerEvent::MessageReceived { message, .. } if message == "TIMER:00:00:30")
    })
    .await;

    // Act – the follower is not ticking, so it delegates
    follower.client().stop_timer().await.expect("stop delegates");

    // Assert
    wait_for_event(
        &mut starter_events,
        status_is("Timer stopped by another client."),
    )
    .await;
    assert_eq!(starter.client().timer().await.1, TimerState::Stopped);
}

#[tokio::test]
async fn test_reset_from_peer_zeros_everyone() {
    let (coordinator, _coordinator_events, port) = start_coordinator().await;
    let (starter, _starter_events) = connect_peer(port).await;
    let (follower, mut follower_events) = connect_peer(port).await;
    wait_for_peers(&coordinator, 2).await;
    starter.client().set_timer(TimerValue::from_secs(60)).await;
    starter.client().start_timer().await.unwrap();
    wait_for_event(&mut follower_events, |e| {
        matches!(e, PeerEvent::MessageReceived { message, .. } if message == "TIMER:00:01:00")
    })
    .await;

    starter.client().reset_timer().await;

    wait_for_event(&mut follower_events, |e| {
        matches!(e, PeerEvent::MessageReceived { message, .. } if message == "RESET")
    })
    .await;
    assert_eq!(
        follower.client().timer().await,
        (TimerValue::ZERO, TimerState::Default)
    );
    assert_eq!(coordinator.timer().await.1, TimerState::Default);
}

// ── Connection loss ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_coordinator_shutdown_disconnects_peer_and_resets_timer() {
    // Arrange
    let (coordinator, _coordinator_events, port) = start_coordinator().await;
    let (peer, mut events) = connect_peer(port).await;
    wait_for_peers(&coordinator, 1).await;
    peer.client().set_timer(TimerValue::from_secs(45)).await;

    // Act
    coordinator.disconnect().await;

    // Assert
    wait_for_event(&mut events, |e| {
        matches!(
            e,
            PeerEvent::ConnectionStateChanged { connected: false, message, .. }
                if message == "Disconnected from server."
        )
    })
    .await;
    wait_for_event(&mut events, |e| {
        matches!(
            e,
            PeerEvent::TimerChanged {
                state: TimerState::Default,
                ..
            }
        )
    })
    .await;
    assert!(!peer.is_connected().await);
}

#[tokio::test]
async fn test_peer_disconnect_is_seen_by_coordinator() {
    let (coordinator, _coordinator_events, port) = start_coordinator().await;
    let (peer, _events) = connect_peer(port).await;
    wait_for_peers(&coordinator, 1).await;

    peer.disconnect().await;

    wait_for_peers(&coordinator, 0).await;
}
