//! The chat hub: connection lifecycle, presence edges, room fan-out.
//!
//! One hub per process. Local delivery goes straight to connection
//! channels; everything broadcast is also published on the backplane so
//! peer instances can repeat it to their own connections.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::Result;
use crate::client::ServiceClient;

use super::ConnectionId;
use super::backplane::{Backplane, BackplaneFrame, RelayedEvent};
use super::protocol::{ClientEvent, ServerEvent, UserOnlineStatus};
use super::registry::OnlineRegistry;
use super::rooms::{Room, Rooms};

/// Persistence seam for chat messages. The hub never talks to storage
/// directly; production wires this to the chat service over the mesh.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a project message and return the stored record.
    async fn save_project_message(
        &self,
        project_id: &str,
        user_id: &str,
        content: &str,
    ) -> Result<Value>;

    /// Persist a team message and return the stored record.
    async fn save_team_message(
        &self,
        team_id: &str,
        user_id: &str,
        content: &str,
    ) -> Result<Value>;

    /// Persist a direct message and return the stored record.
    async fn save_direct_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<Value>;

    /// Mark a direct conversation read for a user.
    async fn mark_read(&self, conversation_id: &str, user_id: &str) -> Result<()>;
}

/// `MessageStore` backed by the chat service's internal API.
pub struct ChatServiceStore {
    client: Arc<ServiceClient>,
    base_url: String,
}

impl ChatServiceStore {
    const SERVICE: &'static str = "chat-service";

    /// Create a store calling the chat service at `base_url`.
    #[must_use]
    pub fn new(client: Arc<ServiceClient>, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl MessageStore for ChatServiceStore {
    async fn save_project_message(
        &self,
        project_id: &str,
        user_id: &str,
        content: &str,
    ) -> Result<Value> {
        let url = format!("{}/internal/messages", self.base_url);
        let body = json!({
            "projectId": project_id,
            "userId": user_id,
            "content": content,
        });
        self.client.post(Self::SERVICE, &url, &body).await
    }

    async fn save_team_message(
        &self,
        team_id: &str,
        user_id: &str,
        content: &str,
    ) -> Result<Value> {
        let url = format!("{}/internal/team-messages", self.base_url);
        let body = json!({
            "teamId": team_id,
            "userId": user_id,
            "content": content,
        });
        self.client.post(Self::SERVICE, &url, &body).await
    }

    async fn save_direct_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<Value> {
        let url = format!("{}/internal/direct-messages", self.base_url);
        let body = json!({
            "conversationId": conversation_id,
            "senderId": sender_id,
            "content": content,
        });
        self.client.post(Self::SERVICE, &url, &body).await
    }

    async fn mark_read(&self, conversation_id: &str, user_id: &str) -> Result<()> {
        let url = format!(
            "{}/internal/conversations/{conversation_id}/read",
            self.base_url
        );
        let body = json!({ "userId": user_id });
        self.client.post(Self::SERVICE, &url, &body).await?;
        Ok(())
    }
}

struct ConnectionHandle {
    sender: mpsc::UnboundedSender<ServerEvent>,
    user_id: Option<String>,
}

/// Realtime coordinator for one process.
pub struct ChatHub {
    node: Uuid,
    connections: DashMap<ConnectionId, ConnectionHandle>,
    online: OnlineRegistry,
    rooms: Rooms,
    backplane: Arc<dyn Backplane>,
    store: Arc<dyn MessageStore>,
}

impl ChatHub {
    /// Build the hub and start consuming the backplane.
    pub fn start(backplane: Arc<dyn Backplane>, store: Arc<dyn MessageStore>) -> Arc<Self> {
        let hub = Arc::new(Self {
            node: Uuid::new_v4(),
            connections: DashMap::new(),
            online: OnlineRegistry::new(),
            rooms: Rooms::new(),
            backplane,
            store,
        });
        let mut rx = hub.backplane.subscribe();
        let listener = Arc::clone(&hub);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(frame) => listener.apply_remote(frame),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "realtime backplane receiver lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        hub
    }

    /// Register a new connection. The receiver is the connection's outbound
    /// event stream.
    pub fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.insert(
            conn,
            ConnectionHandle {
                sender: tx,
                user_id: None,
            },
        );
        debug!(connection = %conn, "realtime connection opened");
        (conn, rx)
    }

    /// Tear down a connection: purge room memberships and, when this was
    /// the user's last connection, broadcast the offline edge.
    pub async fn disconnect(&self, conn: ConnectionId) {
        self.rooms.leave_all(conn);
        let user_id = self
            .connections
            .remove(&conn)
            .and_then(|(_, handle)| handle.user_id);
        debug!(connection = %conn, "realtime connection closed");

        if let Some(user_id) = user_id
            && self.online.unregister(&user_id, conn)
        {
            info!(user = %user_id, "user went offline");
            self.broadcast_presence(&user_id, false).await;
        }
    }

    /// Process one client event.
    pub async fn handle_event(&self, conn: ConnectionId, event: ClientEvent) {
        match event {
            ClientEvent::UserOnline(user_id) => self.user_online(conn, user_id).await,

            ClientEvent::JoinConversation(id) => self.rooms.join(conn, Room::conversation(&id)),
            ClientEvent::LeaveConversation(id) => self.rooms.leave(conn, &Room::conversation(&id)),
            ClientEvent::JoinProject(id) => self.rooms.join(conn, Room::project(&id)),
            ClientEvent::LeaveProject(id) => self.rooms.leave(conn, &Room::project(&id)),
            ClientEvent::JoinTeam(id) => self.rooms.join(conn, Room::team(&id)),
            ClientEvent::LeaveTeam(id) => self.rooms.leave(conn, &Room::team(&id)),

            ClientEvent::MessageSend {
                content,
                project_id,
                user_id,
            } => {
                match self
                    .store
                    .save_project_message(&project_id, &user_id, &content)
                    .await
                {
                    Ok(message) => {
                        self.broadcast_room(&Room::project(&project_id), ServerEvent::MessageNew(message))
                            .await;
                    }
                    Err(e) => {
                        warn!(project = %project_id, error = %e, "project message save failed");
                        self.send_to(conn, ServerEvent::Error {
                            message: "Failed to send message".into(),
                        });
                    }
                }
            }

            ClientEvent::TeamMessageSend {
                content,
                team_id,
                user_id,
            } => {
                match self
                    .store
                    .save_team_message(&team_id, &user_id, &content)
                    .await
                {
                    Ok(message) => {
                        self.broadcast_room(&Room::team(&team_id), ServerEvent::TeamMessageNew(message))
                            .await;
                    }
                    Err(e) => {
                        warn!(team = %team_id, error = %e, "team message save failed");
                        self.send_to(conn, ServerEvent::Error {
                            message: "Failed to send message".into(),
                        });
                    }
                }
            }

            ClientEvent::DmRead {
                conversation_id,
                user_id,
            } => {
                if let Err(e) = self.store.mark_read(&conversation_id, &user_id).await {
                    warn!(conversation = %conversation_id, error = %e, "mark read failed");
                }
                // Receipt goes out regardless; the read state converges on
                // the next fetch even if persistence lagged
                self.broadcast_room(
                    &Room::conversation(&conversation_id),
                    ServerEvent::DmRead {
                        conversation_id,
                        read_by: user_id,
                    },
                )
                .await;
            }

            ClientEvent::TypingStart {
                project_id,
                user_id,
            } => {
                self.broadcast_room_except(
                    conn,
                    &Room::project(&project_id),
                    ServerEvent::TypingUser {
                        user_id,
                        is_typing: true,
                    },
                )
                .await;
            }
            ClientEvent::TypingStop {
                project_id,
                user_id,
            } => {
                self.broadcast_room_except(
                    conn,
                    &Room::project(&project_id),
                    ServerEvent::TypingUser {
                        user_id,
                        is_typing: false,
                    },
                )
                .await;
            }
            ClientEvent::DmTypingStart {
                conversation_id,
                user_id,
            } => {
                self.broadcast_room_except(
                    conn,
                    &Room::conversation(&conversation_id),
                    ServerEvent::DmTyping {
                        user_id,
                        is_typing: true,
                    },
                )
                .await;
            }
            ClientEvent::DmTypingStop {
                conversation_id,
                user_id,
            } => {
                self.broadcast_room_except(
                    conn,
                    &Room::conversation(&conversation_id),
                    ServerEvent::DmTyping {
                        user_id,
                        is_typing: false,
                    },
                )
                .await;
            }

            ClientEvent::UsersOnlineCheck(user_ids) => {
                let statuses = user_ids
                    .into_iter()
                    .map(|user_id| {
                        let online = self.online.is_online(&user_id);
                        UserOnlineStatus { user_id, online }
                    })
                    .collect();
                self.send_to(conn, ServerEvent::UsersOnlineStatus(statuses));
            }
        }
    }

    /// Persist a direct message, fan it out to the conversation room, and
    /// nudge the receiver's personal room. The nudge is best effort.
    pub async fn send_direct_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
    ) -> Result<Value> {
        let message = self
            .store
            .save_direct_message(conversation_id, sender_id, content)
            .await?;

        self.broadcast_room(
            &Room::conversation(conversation_id),
            ServerEvent::DmNew(message.clone()),
        )
        .await;

        let preview: String = content.chars().take(80).collect();
        self.broadcast_room(
            &Room::user(receiver_id),
            ServerEvent::DmNotification {
                conversation_id: conversation_id.to_string(),
                sender_id: sender_id.to_string(),
                preview,
            },
        )
        .await;

        Ok(message)
    }

    /// Whether a user has a live connection in this process.
    pub fn is_online(&self, user_id: &str) -> bool {
        self.online.is_online(user_id)
    }

    async fn user_online(&self, conn: ConnectionId, user_id: String) {
        if let Some(mut handle) = self.connections.get_mut(&conn) {
            handle.user_id = Some(user_id.clone());
        }
        self.rooms.join(conn, Room::user(&user_id));

        if self.online.register(&user_id, conn) {
            info!(user = %user_id, "user came online");
            self.broadcast_presence(&user_id, true).await;
        }
    }

    async fn broadcast_presence(&self, user_id: &str, online: bool) {
        self.deliver_all(&ServerEvent::UserStatus {
            user_id: user_id.to_string(),
            online,
        });
        self.backplane
            .publish(BackplaneFrame {
                origin: self.node,
                event: RelayedEvent::Presence {
                    user_id: user_id.to_string(),
                    online,
                },
            })
            .await;
    }

    async fn broadcast_room(&self, room: &Room, event: ServerEvent) {
        self.deliver_room(room, None, &event);
        self.backplane
            .publish(BackplaneFrame {
                origin: self.node,
                event: RelayedEvent::Room {
                    room: room.as_str().to_string(),
                    event,
                },
            })
            .await;
    }

    /// Room fan-out that skips the originating connection locally. Remote
    /// instances deliver to all their members; the originator is not there.
    async fn broadcast_room_except(&self, skip: ConnectionId, room: &Room, event: ServerEvent) {
        self.deliver_room(room, Some(skip), &event);
        self.backplane
            .publish(BackplaneFrame {
                origin: self.node,
                event: RelayedEvent::Room {
                    room: room.as_str().to_string(),
                    event,
                },
            })
            .await;
    }

    fn apply_remote(&self, frame: BackplaneFrame) {
        if frame.origin == self.node {
            return;
        }
        match frame.event {
            RelayedEvent::Presence { user_id, online } => {
                self.deliver_all(&ServerEvent::UserStatus { user_id, online });
            }
            RelayedEvent::Room { room, event } => {
                self.deliver_room(&Room::from(room), None, &event);
            }
            RelayedEvent::Global { event } => self.deliver_all(&event),
        }
    }

    fn deliver_all(&self, event: &ServerEvent) {
        for handle in &self.connections {
            let _ = handle.sender.send(event.clone());
        }
    }

    fn deliver_room(&self, room: &Room, skip: Option<ConnectionId>, event: &ServerEvent) {
        for conn in self.rooms.members(room) {
            if skip == Some(conn) {
                continue;
            }
            self.send_to(conn, event.clone());
        }
    }

    fn send_to(&self, conn: ConnectionId, event: ServerEvent) {
        if let Some(handle) = self.connections.get(&conn) {
            // A send error means the socket task already exited; disconnect
            // cleanup will remove the handle
            let _ = handle.sender.send(event);
        }
    }
}
