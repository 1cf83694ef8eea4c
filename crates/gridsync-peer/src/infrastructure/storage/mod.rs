//! Persistent storage for the peer.
//!
//! - **`config`** – `PeerConfig` load and save in TOML format.

pub mod config;
