//! Application layer use cases for the peer.
//!
//! - **`handle_messages`** – [`handle_messages::PeerClient`] routes inbound
//!   lines and exposes the commands the UI collaborator issues.
//! - **`transfer`** – The `DATA:`/`CONFIRM` handshake with its timeout.
//! - **`timer_control`** – The peer's copy of the countdown and its ticker.

pub mod handle_messages;
pub mod timer_control;
pub mod transfer;
