//! Infrastructure layer for the peer.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `gridsync_core`, but MUST NOT be imported by the `application` layer.
//!
//! # Sub-modules
//!
//! - **`network`** – The single outbound TCP connection to the coordinator:
//!   connect, line-framed writes and the inbound read loop.
//!
//! - **`node`** – Wires the connection to [`crate::application::handle_messages::PeerClient`]
//!   through the dispatch task.
//!
//! - **`storage`** – `peer.toml` configuration.

pub mod network;
pub mod node;
pub mod storage;
