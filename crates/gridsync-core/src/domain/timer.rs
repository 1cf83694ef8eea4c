//! Countdown value and its replicated state machine.
//!
//! [`Countdown`] is the single logical copy of the timer held by every node.
//! It knows nothing about sockets or tasks: callers drive it once per second
//! with [`Countdown::tick`] and decide from the returned outcome what to
//! transmit.  States:
//!
//! ```text
//!            set            start/resume
//!  Default ───────▶ Set ───────────────▶ Ticking
//!     ▲                                   │  │
//!     │         value reaches zero        │  │ stop / halt
//!     └───────────────────────────────────┘  ▼
//!                                         Stopped ──resume──▶ Ticking
//! ```
//!
//! `reset` returns any state to `Default`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest representable duration, 99:59:59, in seconds.
pub const MAX_SECS: u32 = 99 * 3600 + 59 * 60 + 59;

/// Errors produced by timer parsing and timer commands.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimerError {
    #[error("invalid time format: {0:?}")]
    InvalidFormat(String),

    #[error("Cannot start timer: No time set or not connected.")]
    NothingToStart,

    #[error("Cannot start timer: No time set or not connected.")]
    NotConnected,

    #[error("timer is already running")]
    AlreadyTicking,

    #[error("Timer is not running or no time set.")]
    NotRunning,
}

// ── TimerValue ────────────────────────────────────────────────────────────────

/// Whole-second duration in the range `00:00:00..=99:59:59`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerValue(u32);

impl TimerValue {
    pub const ZERO: TimerValue = TimerValue(0);
    pub const MAX: TimerValue = TimerValue(MAX_SECS);

    /// Builds a value from a second count, clamping to [`TimerValue::MAX`].
    pub fn from_secs(secs: u32) -> Self {
        Self(secs.min(MAX_SECS))
    }

    /// Builds a value from possibly overflowing fields.
    ///
    /// Seconds roll into minutes and minutes into hours before the total is
    /// clamped to 99:59:59, so `from_hms(0, 0, 125)` is `00:02:05`.
    pub fn from_hms(hours: u32, minutes: u32, seconds: u32) -> Self {
        let total = u64::from(hours) * 3600 + u64::from(minutes) * 60 + u64::from(seconds);
        Self(total.min(u64::from(MAX_SECS)) as u32)
    }

    pub fn as_secs(self) -> u32 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn hours(self) -> u32 {
        self.0 / 3600
    }

    pub fn minutes(self) -> u32 {
        (self.0 % 3600) / 60
    }

    pub fn seconds(self) -> u32 {
        self.0 % 60
    }

    /// One second less, saturating at zero.
    pub fn decremented(self) -> Self {
        Self(self.0.saturating_sub(1))
    }

    /// Parses a user-entered duration.
    ///
    /// Accepts `h:m:s` with fields of any width (overflow is normalized) and a
    /// bare six-digit `hhmmss`.  The result is clamped to 99:59:59.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::InvalidFormat`] for anything else.
    pub fn parse_entry(text: &str) -> Result<Self, TimerError> {
        let text = text.trim();
        let invalid = || TimerError::InvalidFormat(text.to_string());

        if text.len() == 6 && text.bytes().all(|b| b.is_ascii_digit()) {
            let field = |range: std::ops::Range<usize>| text[range].parse::<u32>();
            let (h, m, s) = (field(0..2), field(2..4), field(4..6));
            return match (h, m, s) {
                (Ok(h), Ok(m), Ok(s)) => Ok(Self::from_hms(h, m, s)),
                _ => Err(invalid()),
            };
        }

        let fields = split_fields(text).ok_or_else(invalid)?;
        // Saturate absurdly wide fields instead of failing; clamping follows.
        let [h, m, s] = fields.map(|f| f.parse::<u32>().unwrap_or(u32::MAX));
        Ok(Self::from_hms(h, m, s))
    }
}

/// Splits `a:b:c` into three non-empty all-digit fields.
fn split_fields(text: &str) -> Option<[&str; 3]> {
    let mut parts = text.split(':');
    let fields = [parts.next()?, parts.next()?, parts.next()?];
    if parts.next().is_some() {
        return None;
    }
    fields
        .iter()
        .all(|f| !f.is_empty() && f.bytes().all(|b| b.is_ascii_digit()))
        .then_some(fields)
}

impl fmt::Display for TimerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}",
            self.hours(),
            self.minutes(),
            self.seconds()
        )
    }
}

/// Strict wire parsing: `h:m:s` with hours ≤ 99 and minutes, seconds ≤ 59.
impl FromStr for TimerValue {
    type Err = TimerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TimerError::InvalidFormat(s.to_string());
        let fields = split_fields(s).ok_or_else(invalid)?;

        let mut parsed = [0u32; 3];
        for (slot, field) in parsed.iter_mut().zip(fields) {
            *slot = field.parse().map_err(|_| invalid())?;
        }
        let [h, m, sec] = parsed;
        if h > 99 || m > 59 || sec > 59 {
            return Err(invalid());
        }
        Ok(Self::from_hms(h, m, sec))
    }
}

// ── TimerState ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerState {
    /// Zero and idle.
    #[default]
    Default,
    /// Set by the user; has not ticked since.
    Set,
    /// Decrementing once per second.
    Ticking,
    /// Paused; may be resumed if the value is positive.
    Stopped,
}

impl fmt::Display for TimerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimerState::Default => "default",
            TimerState::Set => "set",
            TimerState::Ticking => "ticking",
            TimerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

// ── Countdown ─────────────────────────────────────────────────────────────────

/// Result of one [`Countdown::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The countdown was not ticking; nothing changed.
    Idle,
    /// Decremented to a positive value; still ticking.
    Running(TimerValue),
    /// Reached zero and went back to `Default`.
    Finished,
}

/// Result of a successful [`Countdown::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The local countdown was ticking and is now stopped.
    Stopped(TimerValue),
    /// Nothing ticks locally; the caller should transmit `STOP` and let the
    /// echo stop whoever is ticking.
    DelegateToRemote(TimerValue),
}

/// One node's copy of the replicated timer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Countdown {
    value: TimerValue,
    state: TimerState,
}

impl Countdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> TimerValue {
        self.value
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn is_ticking(&self) -> bool {
        self.state == TimerState::Ticking
    }

    /// Stores a user-entered value.  Always lands in `Set`, even for zero.
    pub fn set(&mut self, value: TimerValue) {
        self.value = value;
        self.state = TimerState::Set;
    }

    /// Begins counting down from the current value.
    ///
    /// # Errors
    ///
    /// - [`TimerError::AlreadyTicking`] if already `Ticking`.
    /// - [`TimerError::NothingToStart`] if the value is zero.
    pub fn start(&mut self) -> Result<TimerValue, TimerError> {
        if self.is_ticking() {
            return Err(TimerError::AlreadyTicking);
        }
        if self.value.is_zero() {
            return Err(TimerError::NothingToStart);
        }
        self.state = TimerState::Ticking;
        Ok(self.value)
    }

    /// Same transition as [`Countdown::start`], used from `Stopped`.
    pub fn resume(&mut self) -> Result<TimerValue, TimerError> {
        self.start()
    }

    /// Advances the countdown by one second.
    pub fn tick(&mut self) -> TickOutcome {
        if !self.is_ticking() {
            return TickOutcome::Idle;
        }
        self.value = self.value.decremented();
        if self.value.is_zero() {
            self.state = TimerState::Default;
            TickOutcome::Finished
        } else {
            TickOutcome::Running(self.value)
        }
    }

    /// Local stop command.
    ///
    /// `remote_available` tells whether a connection exists to delegate the
    /// stop to when nothing ticks locally.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::NotRunning`] when there is nothing to stop.
    pub fn stop(&mut self, remote_available: bool) -> Result<StopOutcome, TimerError> {
        if self.is_ticking() {
            self.state = TimerState::Stopped;
            return Ok(StopOutcome::Stopped(self.value));
        }
        if !self.value.is_zero() && remote_available {
            return Ok(StopOutcome::DelegateToRemote(self.value));
        }
        Err(TimerError::NotRunning)
    }

    /// Inbound `STOP`: stop without changing the value.
    ///
    /// Returns `true` if the countdown was ticking.
    pub fn halt(&mut self) -> bool {
        let was_ticking = self.is_ticking();
        self.state = if self.value.is_zero() {
            TimerState::Default
        } else {
            TimerState::Stopped
        };
        was_ticking
    }

    /// Returns to `Default` with the value zeroed.
    pub fn reset(&mut self) {
        self.value = TimerValue::ZERO;
        self.state = TimerState::Default;
    }

    /// Adopts a remote value and keeps counting (coordinator role).
    ///
    /// Returns `true` if the caller must start a ticker: the value is positive
    /// and the countdown was not already ticking.  A zero value returns to
    /// `Default`.
    pub fn adopt_running(&mut self, value: TimerValue) -> bool {
        self.value = value;
        if value.is_zero() {
            self.state = TimerState::Default;
            return false;
        }
        if self.is_ticking() {
            return false;
        }
        self.state = TimerState::Ticking;
        true
    }

    /// Adopts a remote value without counting locally (peer role).
    ///
    /// If the countdown is ticking and `value` equals the current value the
    /// call changes nothing.  Otherwise the value is stored and the state
    /// becomes `Stopped` (or `Default` for zero).  Returns `true` if a local
    /// ticker was running and must be stopped.
    pub fn adopt_remote(&mut self, value: TimerValue) -> bool {
        let was_ticking = self.is_ticking();
        if was_ticking && value == self.value {
            return false;
        }
        self.value = value;
        self.state = if value.is_zero() {
            TimerState::Default
        } else {
            TimerState::Stopped
        };
        was_ticking
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── TimerValue ───────────────────────────────────────────────────────────

    #[test]
    fn test_display_is_zero_padded() {
        assert_eq!(TimerValue::from_secs(0).to_string(), "00:00:00");
        assert_eq!(TimerValue::from_hms(1, 2, 3).to_string(), "01:02:03");
        assert_eq!(TimerValue::MAX.to_string(), "99:59:59");
    }

    #[test]
    fn test_from_hms_normalizes_overflow_seconds() {
        // 125 s becomes 2 min 5 s.
        let v = TimerValue::from_hms(0, 0, 125);
        assert_eq!((v.hours(), v.minutes(), v.seconds()), (0, 2, 5));
    }

    #[test]
    fn test_from_hms_normalizes_overflow_minutes() {
        let v = TimerValue::from_hms(1, 75, 0);
        assert_eq!(v.to_string(), "02:15:00");
    }

    #[test]
    fn test_from_hms_clamps_to_max() {
        assert_eq!(TimerValue::from_hms(99, 59, 60), TimerValue::MAX);
        assert_eq!(TimerValue::from_hms(u32::MAX, u32::MAX, u32::MAX), TimerValue::MAX);
        assert_eq!(TimerValue::from_secs(u32::MAX), TimerValue::MAX);
    }

    #[test]
    fn test_from_str_accepts_short_fields() {
        let v: TimerValue = "1:2:3".parse().unwrap();
        assert_eq!(v, TimerValue::from_hms(1, 2, 3));
    }

    #[test]
    fn test_from_str_rejects_out_of_range_fields() {
        assert!("100:00:00".parse::<TimerValue>().is_err());
        assert!("00:60:00".parse::<TimerValue>().is_err());
        assert!("00:00:60".parse::<TimerValue>().is_err());
    }

    #[test]
    fn test_from_str_rejects_malformed_text() {
        for text in ["", "10", "00:00", "00:00:00:00", "aa:bb:cc", "00::00", "-1:00:00"] {
            assert!(
                text.parse::<TimerValue>().is_err(),
                "{text:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_from_str_round_trips_display_for_every_minute() {
        for secs in (0..=MAX_SECS).step_by(60) {
            let v = TimerValue::from_secs(secs);
            assert_eq!(v.to_string().parse::<TimerValue>(), Ok(v));
        }
    }

    #[test]
    fn test_parse_entry_accepts_bare_six_digits() {
        assert_eq!(
            TimerValue::parse_entry("013000").unwrap(),
            TimerValue::from_hms(1, 30, 0)
        );
    }

    #[test]
    fn test_parse_entry_normalizes_overflow() {
        assert_eq!(TimerValue::parse_entry("00:00:125").unwrap().to_string(), "00:02:05");
        assert_eq!(TimerValue::parse_entry("009999").unwrap().to_string(), "01:40:39");
    }

    #[test]
    fn test_parse_entry_clamps_huge_values() {
        assert_eq!(TimerValue::parse_entry("999:99:99").unwrap(), TimerValue::MAX);
        assert_eq!(
            TimerValue::parse_entry("99999999999:0:0").unwrap(),
            TimerValue::MAX
        );
    }

    #[test]
    fn test_parse_entry_rejects_garbage() {
        assert!(matches!(
            TimerValue::parse_entry("ten minutes"),
            Err(TimerError::InvalidFormat(_))
        ));
        assert!(TimerValue::parse_entry("12345").is_err());
    }

    // ── Countdown ────────────────────────────────────────────────────────────

    #[test]
    fn test_new_countdown_is_default_zero() {
        let c = Countdown::new();
        assert_eq!(c.state(), TimerState::Default);
        assert!(c.value().is_zero());
    }

    #[test]
    fn test_set_yields_value_and_set_state_for_all_minutes() {
        for secs in (0..=MAX_SECS).step_by(97) {
            let mut c = Countdown::new();
            let d = TimerValue::from_secs(secs);
            c.set(d);
            assert_eq!(c.value(), d);
            assert_eq!(c.state(), TimerState::Set);
        }
    }

    #[test]
    fn test_start_on_default_fails_and_leaves_state() {
        // Arrange
        let mut c = Countdown::new();

        // Act
        let result = c.start();

        // Assert
        assert_eq!(result, Err(TimerError::NothingToStart));
        assert_eq!(c.state(), TimerState::Default);
    }

    #[test]
    fn test_start_twice_reports_already_ticking() {
        let mut c = Countdown::new();
        c.set(TimerValue::from_secs(5));
        c.start().unwrap();
        assert_eq!(c.start(), Err(TimerError::AlreadyTicking));
    }

    #[test]
    fn test_two_ticks_from_two_seconds_finish_in_default() {
        // Arrange
        let mut c = Countdown::new();
        c.set(TimerValue::from_secs(2));
        c.start().unwrap();

        // Act
        let first = c.tick();
        let second = c.tick();
        let third = c.tick();

        // Assert
        assert_eq!(first, TickOutcome::Running(TimerValue::from_secs(1)));
        assert_eq!(second, TickOutcome::Finished);
        assert_eq!(third, TickOutcome::Idle, "no activity after Default");
        assert_eq!(c.state(), TimerState::Default);
        assert!(c.value().is_zero());
    }

    #[test]
    fn test_tick_while_stopped_is_idle() {
        let mut c = Countdown::new();
        c.set(TimerValue::from_secs(10));
        assert_eq!(c.tick(), TickOutcome::Idle);
        assert_eq!(c.value(), TimerValue::from_secs(10));
    }

    #[test]
    fn test_stop_while_ticking_keeps_value() {
        let mut c = Countdown::new();
        c.set(TimerValue::from_secs(10));
        c.start().unwrap();
        c.tick();

        let outcome = c.stop(false).unwrap();

        assert_eq!(outcome, StopOutcome::Stopped(TimerValue::from_secs(9)));
        assert_eq!(c.state(), TimerState::Stopped);
    }

    #[test]
    fn test_stop_not_ticking_with_value_delegates_when_connected() {
        let mut c = Countdown::new();
        c.adopt_remote(TimerValue::from_secs(30));

        assert_eq!(
            c.stop(true),
            Ok(StopOutcome::DelegateToRemote(TimerValue::from_secs(30)))
        );
        assert_eq!(c.state(), TimerState::Stopped, "local state unchanged");
    }

    #[test]
    fn test_stop_with_nothing_to_stop_fails() {
        let mut c = Countdown::new();
        assert_eq!(c.stop(true), Err(TimerError::NotRunning));

        c.set(TimerValue::from_secs(5));
        assert_eq!(c.stop(false), Err(TimerError::NotRunning));
    }

    #[test]
    fn test_resume_after_stop() {
        let mut c = Countdown::new();
        c.set(TimerValue::from_secs(3));
        c.start().unwrap();
        c.stop(false).unwrap();

        assert_eq!(c.resume(), Ok(TimerValue::from_secs(3)));
        assert!(c.is_ticking());
    }

    #[test]
    fn test_halt_keeps_value_and_reports_previous_ticking() {
        let mut c = Countdown::new();
        c.set(TimerValue::from_secs(8));
        c.start().unwrap();

        assert!(c.halt());
        assert_eq!(c.state(), TimerState::Stopped);
        assert_eq!(c.value(), TimerValue::from_secs(8));
        assert!(!c.halt());
    }

    #[test]
    fn test_halt_on_zero_value_goes_default() {
        let mut c = Countdown::new();
        c.halt();
        assert_eq!(c.state(), TimerState::Default);
    }

    #[test]
    fn test_reset_from_ticking() {
        let mut c = Countdown::new();
        c.set(TimerValue::from_secs(8));
        c.start().unwrap();

        c.reset();

        assert_eq!(c, Countdown::new());
    }

    #[test]
    fn test_adopt_running_starts_only_once() {
        let mut c = Countdown::new();
        assert!(c.adopt_running(TimerValue::from_secs(10)));
        assert!(!c.adopt_running(TimerValue::from_secs(9)));
        assert_eq!(c.value(), TimerValue::from_secs(9));
        assert!(c.is_ticking());
    }

    #[test]
    fn test_adopt_running_zero_returns_default() {
        let mut c = Countdown::new();
        c.adopt_running(TimerValue::from_secs(10));
        assert!(!c.adopt_running(TimerValue::ZERO));
        assert_eq!(c.state(), TimerState::Default);
    }

    #[test]
    fn test_adopt_remote_positive_is_resumable() {
        let mut c = Countdown::new();
        assert!(!c.adopt_remote(TimerValue::from_secs(20)));
        assert_eq!(c.state(), TimerState::Stopped);
        assert!(c.resume().is_ok());
    }

    #[test]
    fn test_adopt_remote_mismatch_while_ticking_stops_local_ticker() {
        let mut c = Countdown::new();
        c.set(TimerValue::from_secs(20));
        c.start().unwrap();

        let must_stop = c.adopt_remote(TimerValue::from_secs(15));

        assert!(must_stop);
        assert_eq!(c.state(), TimerState::Stopped);
        assert_eq!(c.value(), TimerValue::from_secs(15));
    }

    #[test]
    fn test_adopt_remote_matching_value_while_ticking_keeps_ticking() {
        let mut c = Countdown::new();
        c.set(TimerValue::from_secs(20));
        c.start().unwrap();

        assert!(!c.adopt_remote(TimerValue::from_secs(20)));
        assert!(c.is_ticking());
    }

    #[test]
    fn test_adopt_remote_zero_goes_default() {
        let mut c = Countdown::new();
        c.adopt_remote(TimerValue::from_secs(20));
        c.adopt_remote(TimerValue::ZERO);
        assert_eq!(c.state(), TimerState::Default);
    }
}
