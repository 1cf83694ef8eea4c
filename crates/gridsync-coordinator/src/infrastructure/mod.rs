//! Infrastructure layer for the coordinator.
//!
//! Contains OS-facing adapters: the TCP listener and config file storage,
//! plus [`node`], which wires them to the application layer.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `gridsync_core`, but MUST NOT be imported by the `application` layer.

pub mod network;
pub mod node;
pub mod storage;
