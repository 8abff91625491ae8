//! Realtime layer: presence, rooms, and cross-instance fan-out.

pub mod backplane;
pub mod hub;
pub mod protocol;
pub mod registry;
pub mod rooms;
pub mod socket;

pub use backplane::{Backplane, BackplaneFrame, LocalBackplane, RedisBackplane, RelayedEvent};
pub use hub::{ChatHub, ChatServiceStore, MessageStore};
pub use protocol::{ClientEvent, ServerEvent, UserOnlineStatus};
pub use registry::OnlineRegistry;
pub use rooms::{Room, Rooms};

/// Identifies one live socket within a process.
pub type ConnectionId = uuid::Uuid;
