//! gridsync-peer library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does a peer do?
//!
//! A *peer* is a client node with exactly one TCP connection to the
//! coordinator.  It:
//!
//! 1. Keeps a local grid of records under its own column set.
//! 2. Pushes a chosen record to the coordinator as `DATA:<json>` and waits up
//!    to a configurable timeout for the coordinator's `CONFIRM`.
//! 3. Holds its own copy of the shared countdown.  A peer that starts the
//!    countdown ticks it locally and transmits every new value; a peer that
//!    receives `TIMER:` values adopts them without ticking.

/// Application layer: routing, the transfer handshake and timer control.
pub mod application;

/// Infrastructure layer: TCP connection, node wiring and config storage.
pub mod infrastructure;
