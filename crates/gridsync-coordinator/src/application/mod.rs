//! Application layer use cases for the coordinator.
//!
//! Nothing here opens a socket.  Outbound traffic goes through the
//! [`handle_messages::Broadcaster`] trait and inbound traffic arrives as
//! [`handle_messages::TransportEvent`] values, so both use cases are unit
//! tested with in-memory doubles.
//!
//! # Sub-modules
//!
//! - **`manage_sessions`** – Bookkeeping of live peer connections keyed by
//!   [`gridsync_core::SessionId`].
//!
//! - **`handle_messages`** – The coordinator's message router.  Appends
//!   records, acknowledges transfers, adopts and rebroadcasts timer values and
//!   runs the coordinator's own countdown ticker.

pub mod handle_messages;
pub mod manage_sessions;
