//! SessionRegistry: the coordinator's map of live peer connections.
//!
//! Every accepted TCP connection gets a fresh [`SessionId`] and one entry
//! here.  The entry is removed exactly once, by whichever of these happens
//! first:
//!
//! ```text
//! read loop hits EOF/error ─┐
//! fan-out write fails ──────┼──►  remove(id)  ──►  Some(conn)  (first caller)
//! disconnect() drains ──────┘                 └──►  None        (everyone else)
//! ```
//!
//! Only the caller that receives `Some` raises a disconnect event, which is
//! what keeps a racing read-loop exit and an explicit disconnect from
//! reporting the same peer twice.
//!
//! The registry is generic over the connection handle so it can be tested
//! without sockets.  In production `C` is the listener's per-session handle
//! and the registry lives behind a `tokio::sync::Mutex`.

use std::collections::HashMap;

use gridsync_core::SessionId;

/// In-memory registry of live connections.
///
/// Insertion order is irrelevant; fan-out visits entries in map order.
#[derive(Debug)]
pub struct SessionRegistry<C> {
    sessions: HashMap<SessionId, C>,
}

impl<C> Default for SessionRegistry<C> {
    fn default() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }
}

impl<C> SessionRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection.  Returns the previous handle if `id` was
    /// already present, which never happens with freshly generated ids.
    pub fn add(&mut self, id: SessionId, connection: C) -> Option<C> {
        self.sessions.insert(id, connection)
    }

    /// Removes a connection.  Removing an absent id is a no-op returning `None`.
    pub fn remove(&mut self, id: SessionId) -> Option<C> {
        self.sessions.remove(&id)
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SessionId, &C)> {
        self.sessions.iter().map(|(id, conn)| (*id, conn))
    }

    /// Removes and returns every entry.
    pub fn drain(&mut self) -> Vec<(SessionId, C)> {
        self.sessions.drain().collect()
    }
}
