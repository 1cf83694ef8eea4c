//! # gridsync-core
//!
//! Shared library for GridSync containing the line protocol codec, the DATA
//! payload format, and the record and countdown domain types.
//!
//! This crate is used by both the coordinator and peer applications.
//! It has no OS-specific code and opens no sockets.  The only async piece is
//! the frame reader in `protocol::framing`, built on tokio's I/O traits.
//!
//! # Architecture overview
//!
//! GridSync keeps a table of records and a countdown timer in sync between
//! one coordinator (the server) and any number of peers (the clients).  Peers
//! push records to the coordinator and every node drives or follows the same
//! countdown.
//!
//! - **`protocol`** – How messages travel over the network.  Every message is
//!   a single UTF-8 line (`CONFIRM`, `DATA:<json>`, `TIMER:<hh:mm:ss>`,
//!   `STOP`, `RESET`) terminated by `\n`.
//!
//! - **`domain`** – Pure state with no I/O.  [`Record`] and [`RecordTable`]
//!   model the tabular data; [`Countdown`] is the replicated timer state
//!   machine.

pub mod domain;
pub mod protocol;

pub use domain::record::{Record, RecordTable};
pub use domain::timer::{Countdown, StopOutcome, TickOutcome, TimerError, TimerState, TimerValue};
pub use protocol::codec::{decode_line, encode_line, encode_message, ProtocolError};
pub use protocol::messages::{MessageKind, SendTarget, SessionId, SyncMessage};
pub use protocol::payload::RecordPayload;
