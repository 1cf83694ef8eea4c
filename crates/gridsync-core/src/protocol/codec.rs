//! Line codec for encoding and decoding GridSync protocol messages.
//!
//! Wire format:
//! ```text
//! <message>\n
//! ```
//! One UTF-8 message per line, no length prefix.  Messages never contain the
//! delimiter themselves; callers guarantee this (JSON produced by
//! `serde_json::to_string` never contains a raw newline).
//!
//! Classification precedence on decode is `CONFIRM`, `DATA:`, `TIMER:`,
//! `STOP`, `RESET`.  Lines matching none of them decode to `Ok(None)`.
//!
//! Readers cap a frame at [`MAX_LINE_BYTES`] and decode it with
//! [`decode_frame`], which never fails: invalid UTF-8 becomes U+FFFD.

use thiserror::Error;

use crate::domain::timer::TimerValue;
use crate::protocol::messages::{
    MessageKind, SyncMessage, CONFIRM, DATA_PREFIX, LINE_DELIMITER, RESET, STOP, TIMER_PREFIX,
};
use crate::protocol::payload::RecordPayload;

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The text after `TIMER:` is not a valid `hh:mm:ss` value.
    #[error("invalid timer value: {0:?}")]
    InvalidTimer(String),

    /// The JSON after `DATA:` could not be parsed into the expected shape.
    #[error("invalid DATA payload: {0}")]
    InvalidPayload(String),

    /// A required field of the DATA payload is absent or `null`.
    #[error("DATA payload is missing field {0:?}")]
    MissingField(&'static str),

    /// The payload could not be serialized.
    #[error("failed to encode payload: {0}")]
    Encode(String),
}

/// Longest accepted line, delimiter excluded.  Longer lines are discarded.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

// ── Public API ────────────────────────────────────────────────────────────────

/// Turns one raw frame into line text.
///
/// Strips a trailing `\n` and then a trailing `\r`.  Bytes that are not valid
/// UTF-8 are replaced with U+FFFD, so a corrupt line still reaches the router
/// (which rejects it) instead of ending the connection.
pub fn decode_frame(frame: &[u8]) -> String {
    let frame = frame.strip_suffix(b"\n").unwrap_or(frame);
    let frame = frame.strip_suffix(b"\r").unwrap_or(frame);
    String::from_utf8_lossy(frame).into_owned()
}

/// Classifies a line by its fixed prefix without parsing the payload.
///
/// # Examples
///
/// ```rust
/// use gridsync_core::protocol::{classify, MessageKind};
///
/// assert_eq!(classify("TIMER:00:01:00"), Some(MessageKind::Timer));
/// assert_eq!(classify("HELLO"), None);
/// ```
pub fn classify(line: &str) -> Option<MessageKind> {
    if line == CONFIRM {
        Some(MessageKind::Confirm)
    } else if line.starts_with(DATA_PREFIX) {
        Some(MessageKind::Data)
    } else if line.starts_with(TIMER_PREFIX) {
        Some(MessageKind::Timer)
    } else if line == STOP {
        Some(MessageKind::Stop)
    } else if line == RESET {
        Some(MessageKind::Reset)
    } else {
        None
    }
}

/// Decodes one line (without its trailing delimiter) into a [`SyncMessage`].
///
/// Returns `Ok(None)` for lines that match no known prefix; such lines are
/// ignored by the routers.
///
/// # Errors
///
/// Returns [`ProtocolError`] if a recognised prefix carries a malformed
/// payload.
///
/// # Examples
///
/// ```rust
/// use gridsync_core::protocol::{decode_line, SyncMessage};
/// use gridsync_core::TimerValue;
///
/// let msg = decode_line("TIMER:00:00:10").unwrap();
/// assert_eq!(msg, Some(SyncMessage::Timer(TimerValue::from_secs(10))));
/// ```
pub fn decode_line(line: &str) -> Result<Option<SyncMessage>, ProtocolError> {
    let Some(kind) = classify(line) else {
        return Ok(None);
    };

    let msg = match kind {
        MessageKind::Confirm => SyncMessage::Confirm,
        MessageKind::Data => {
            let json = &line[DATA_PREFIX.len()..];
            SyncMessage::Data(RecordPayload::from_json(json)?)
        }
        MessageKind::Timer => {
            let text = line[TIMER_PREFIX.len()..].trim();
            let value = text
                .parse::<TimerValue>()
                .map_err(|_| ProtocolError::InvalidTimer(text.to_string()))?;
            SyncMessage::Timer(value)
        }
        MessageKind::Stop => SyncMessage::Stop,
        MessageKind::Reset => SyncMessage::Reset,
    };
    Ok(Some(msg))
}

/// Encodes a message as its wire text, without the trailing delimiter.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if the DATA payload cannot be serialized.
pub fn encode_message(msg: &SyncMessage) -> Result<String, ProtocolError> {
    let text = match msg {
        SyncMessage::Confirm => CONFIRM.to_string(),
        SyncMessage::Data(payload) => format!("{DATA_PREFIX}{}", payload.to_json()?),
        SyncMessage::Timer(value) => format!("{TIMER_PREFIX}{value}"),
        SyncMessage::Stop => STOP.to_string(),
        SyncMessage::Reset => RESET.to_string(),
    };
    Ok(text)
}

/// Encodes a message as a complete wire line including the `\n` delimiter.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if the DATA payload cannot be serialized.
pub fn encode_line(msg: &SyncMessage) -> Result<String, ProtocolError> {
    let mut line = encode_message(msg)?;
    line.push(LINE_DELIMITER);
    Ok(line)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
