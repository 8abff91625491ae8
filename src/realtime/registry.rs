//! Online-user registry: process-local presence truth.
//!
//! A user is online iff their set of live connection ids is non-empty.
//! Only the 0 to 1 and 1 to 0 edges are interesting: they are the moments a
//! status broadcast goes out. Cross-process visibility comes from the
//! backplane relaying those broadcasts, never from sharing this registry.

use std::collections::HashSet;

use dashmap::DashMap;

use super::ConnectionId;

/// Per-process map of user id → live connection ids.
#[derive(Default)]
pub struct OnlineRegistry {
    users: DashMap<String, HashSet<ConnectionId>>,
}

impl OnlineRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for a user. Returns `true` when this is the
    /// user's first live connection (the "came online" edge).
    pub fn register(&self, user_id: &str, conn: ConnectionId) -> bool {
        let mut entry = self.users.entry(user_id.to_string()).or_default();
        let was_empty = entry.is_empty();
        entry.insert(conn);
        was_empty
    }

    /// Drop a connection for a user. Returns `true` when the user's set
    /// became empty (the "went offline" edge); the entry is removed.
    pub fn unregister(&self, user_id: &str, conn: ConnectionId) -> bool {
        let went_offline = match self.users.get_mut(user_id) {
            Some(mut entry) => {
                entry.remove(&conn);
                entry.is_empty()
            }
            None => false,
        };
        if went_offline {
            self.users.remove(user_id);
        }
        went_offline
    }

    /// Whether the user has at least one live connection in this process.
    pub fn is_online(&self, user_id: &str) -> bool {
        self.users
            .get(user_id)
            .is_some_and(|conns| !conns.is_empty())
    }

    /// Live connection count for a user.
    pub fn connection_count(&self, user_id: &str) -> usize {
        self.users.get(user_id).map_or(0, |conns| conns.len())
    }
}
