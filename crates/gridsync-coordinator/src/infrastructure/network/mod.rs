//! Network infrastructure for the coordinator.
//!
//! # Sub-modules
//!
//! - **`listener`** – Binds the TCP port, accepts peers, runs one read loop
//!   per session and implements fan-out writes for the
//!   [`Broadcaster`](crate::application::handle_messages::Broadcaster) seam.

pub mod listener;

pub use listener::{CoordinatorServer, NetworkError};
