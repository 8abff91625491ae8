//! Room naming and membership.
//!
//! Rooms are flat string scopes of the form `<kind>:<id>`. Membership is
//! tracked per connection, with a reverse index so a dropped connection
//! can be purged from every room it joined in one sweep.

use std::collections::HashSet;
use std::fmt;

use dashmap::DashMap;

use super::ConnectionId;

/// A broadcast scope. Constructed through the kind-specific helpers so
/// prefixes stay consistent across join, leave and fan-out paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Room(String);

impl Room {
    /// Direct-conversation room.
    #[must_use]
    pub fn conversation(id: &str) -> Self {
        Self(format!("conversation:{id}"))
    }

    /// Project chat room.
    #[must_use]
    pub fn project(id: &str) -> Self {
        Self(format!("project:{id}"))
    }

    /// Team room.
    #[must_use]
    pub fn team(id: &str) -> Self {
        Self(format!("team:{id}"))
    }

    /// Personal room, auto-joined on `user:online`. Targeted delivery
    /// (notifications, read receipts) goes through here.
    #[must_use]
    pub fn user(id: &str) -> Self {
        Self(format!("user:{id}"))
    }

    /// The room's wire name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Room {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Process-local membership index.
#[derive(Default)]
pub struct Rooms {
    members: DashMap<Room, HashSet<ConnectionId>>,
    joined: DashMap<ConnectionId, HashSet<Room>>,
}

impl Rooms {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a room.
    pub fn join(&self, conn: ConnectionId, room: Room) {
        self.members.entry(room.clone()).or_default().insert(conn);
        self.joined.entry(conn).or_default().insert(room);
    }

    /// Remove a connection from one room.
    pub fn leave(&self, conn: ConnectionId, room: &Room) {
        if let Some(mut conns) = self.members.get_mut(room) {
            conns.remove(&conn);
        }
        if let Some(mut rooms) = self.joined.get_mut(&conn) {
            rooms.remove(room);
        }
    }

    /// Remove a connection from every room it joined. Used on disconnect.
    pub fn leave_all(&self, conn: ConnectionId) {
        let Some((_, rooms)) = self.joined.remove(&conn) else {
            return;
        };
        for room in rooms {
            if let Some(mut conns) = self.members.get_mut(&room) {
                conns.remove(&conn);
            }
        }
    }

    /// Snapshot of the connections currently in a room.
    pub fn members(&self, room: &Room) -> Vec<ConnectionId> {
        self.members
            .get(room)
            .map(|conns| conns.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Whether a connection is in the room.
    pub fn contains(&self, room: &Room, conn: ConnectionId) -> bool {
        self.members
            .get(room)
            .is_some_and(|conns| conns.contains(&conn))
    }
}
