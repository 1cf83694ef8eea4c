//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads `coordinator.toml` from the platform config
//! directory (or an explicit path) and falls back to defaults when the file
//! does not exist yet.

pub mod config;
