//! Domain layer: pure record and countdown state.
//!
//! Types in this module perform no I/O and hold no locks.  The coordinator
//! and peer applications wrap them in `tokio::sync::Mutex` where several
//! tasks share them.

pub mod record;
pub mod timer;

pub use record::{Record, RecordTable};
pub use timer::{Countdown, StopOutcome, TickOutcome, TimerError, TimerState, TimerValue};
