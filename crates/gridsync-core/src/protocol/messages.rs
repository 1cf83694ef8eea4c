//! All GridSync protocol message types.
//!
//! The wire protocol is line-oriented UTF-8 text.  One message per line:
//!
//! ```text
//! CONFIRM
//! DATA:{"Columns":["Name","Age"],"Record":{"Name":"Ann","Age":"30"}}
//! TIMER:00:05:00
//! STOP
//! RESET
//! ```

use uuid::Uuid;

use crate::domain::timer::TimerValue;
use crate::protocol::payload::RecordPayload;

/// Opaque identity assigned by the coordinator to each accepted connection.
pub type SessionId = Uuid;

// ── Wire tokens ───────────────────────────────────────────────────────────────

/// Acknowledgment of a prior `DATA:` transfer.
pub const CONFIRM: &str = "CONFIRM";
/// Prefix of a record transfer; followed by a JSON object.
pub const DATA_PREFIX: &str = "DATA:";
/// Prefix of an authoritative timer value; followed by `hh:mm:ss`.
pub const TIMER_PREFIX: &str = "TIMER:";
/// Pause the countdown without resetting it.
pub const STOP: &str = "STOP";
/// Zero the countdown and return it to the default state.
pub const RESET: &str = "RESET";

/// Line delimiter appended to every encoded message.
pub const LINE_DELIMITER: char = '\n';

// ── Message kinds ─────────────────────────────────────────────────────────────

/// Classification of an inbound line, independent of payload validity.
///
/// A line can be recognised as `Data` or `Timer` even when its payload turns
/// out to be malformed; the coordinator relies on this to still acknowledge a
/// broken `DATA:` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Confirm,
    Data,
    Timer,
    Stop,
    Reset,
}

impl MessageKind {
    /// Short name used in log output; never includes payload contents.
    pub fn name(self) -> &'static str {
        match self {
            MessageKind::Confirm => "CONFIRM",
            MessageKind::Data => "DATA",
            MessageKind::Timer => "TIMER",
            MessageKind::Stop => "STOP",
            MessageKind::Reset => "RESET",
        }
    }
}

// ── Messages ──────────────────────────────────────────────────────────────────

/// A fully parsed protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMessage {
    /// Acknowledges the most recent `DATA:` transfer on this connection.
    Confirm,
    /// A single record together with the sender's column order.
    Data(RecordPayload),
    /// Authoritative countdown value.
    Timer(TimerValue),
    /// Stop the countdown, keeping its value.
    Stop,
    /// Zero the countdown.
    Reset,
}

impl SyncMessage {
    /// Returns the [`MessageKind`] of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            SyncMessage::Confirm => MessageKind::Confirm,
            SyncMessage::Data(_) => MessageKind::Data,
            SyncMessage::Timer(_) => MessageKind::Timer,
            SyncMessage::Stop => MessageKind::Stop,
            SyncMessage::Reset => MessageKind::Reset,
        }
    }
}

// ── Send targets ──────────────────────────────────────────────────────────────

/// Which of the coordinator's connections a message is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendTarget {
    /// Exactly one connection.
    One(SessionId),
    /// Every live connection.
    All,
    /// Every live connection except the given one (usually the originator).
    AllExcept(SessionId),
}

impl SendTarget {
    /// Returns `true` if a connection with identity `id` is addressed.
    pub fn includes(&self, id: SessionId) -> bool {
        match *self {
            SendTarget::One(target) => target == id,
            SendTarget::All => true,
            SendTarget::AllExcept(excluded) => excluded != id,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_target_one_includes_only_that_session() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let target = SendTarget::One(a);
        assert!(target.includes(a));
        assert!(!target.includes(b));
    }

    #[test]
    fn test_send_target_all_includes_everyone() {
        assert!(SendTarget::All.includes(Uuid::new_v4()));
    }

    #[test]
    fn test_send_target_all_except_excludes_originator() {
        let origin = Uuid::new_v4();
        let other = Uuid::new_v4();
        let target = SendTarget::AllExcept(origin);
        assert!(!target.includes(origin));
        assert!(target.includes(other));
    }

    #[test]
    fn test_message_kind_matches_variant() {
        assert_eq!(SyncMessage::Confirm.kind(), MessageKind::Confirm);
        assert_eq!(SyncMessage::Stop.kind(), MessageKind::Stop);
        assert_eq!(SyncMessage::Reset.kind(), MessageKind::Reset);
        assert_eq!(
            SyncMessage::Timer(TimerValue::from_secs(5)).kind(),
            MessageKind::Timer
        );
    }

    #[test]
    fn test_message_kind_name_has_no_payload() {
        assert_eq!(MessageKind::Data.name(), "DATA");
        assert_eq!(MessageKind::Timer.name(), "TIMER");
    }
}
