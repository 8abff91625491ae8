//! Wire protocol for the realtime socket.
//!
//! Every frame is a JSON envelope `{"event": "...", "data": ...}`. Client
//! events carry ids as plain strings where the payload is a single value,
//! and camelCase objects otherwise.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frames a client may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Announce identity. Data is the user id.
    #[serde(rename = "user:online")]
    UserOnline(String),

    /// Join the room for a direct conversation id.
    #[serde(rename = "join:conversation")]
    JoinConversation(String),
    /// Leave a direct conversation room.
    #[serde(rename = "leave:conversation")]
    LeaveConversation(String),
    /// Join a project chat room.
    #[serde(rename = "join:project")]
    JoinProject(String),
    /// Leave a project chat room.
    #[serde(rename = "leave:project")]
    LeaveProject(String),
    /// Join a team room.
    #[serde(rename = "join:team")]
    JoinTeam(String),
    /// Leave a team room.
    #[serde(rename = "leave:team")]
    LeaveTeam(String),

    /// Persist a project chat message and fan it out to the project room.
    #[serde(rename = "message:send", rename_all = "camelCase")]
    MessageSend {
        content: String,
        project_id: String,
        user_id: String,
    },

    /// Persist a team chat message and fan it out to the team room.
    #[serde(rename = "team:message:send", rename_all = "camelCase")]
    TeamMessageSend {
        content: String,
        team_id: String,
        user_id: String,
    },

    /// Mark a direct conversation read and tell the other side.
    #[serde(rename = "dm:read", rename_all = "camelCase")]
    DmRead {
        conversation_id: String,
        user_id: String,
    },

    /// The sender started typing in a project room.
    #[serde(rename = "typing:start", rename_all = "camelCase")]
    TypingStart {
        project_id: String,
        user_id: String,
    },
    /// The sender stopped typing in a project room.
    #[serde(rename = "typing:stop", rename_all = "camelCase")]
    TypingStop {
        project_id: String,
        user_id: String,
    },
    /// The sender started typing in a direct conversation.
    #[serde(rename = "dm:typing:start", rename_all = "camelCase")]
    DmTypingStart {
        conversation_id: String,
        user_id: String,
    },
    /// The sender stopped typing in a direct conversation.
    #[serde(rename = "dm:typing:stop", rename_all = "camelCase")]
    DmTypingStop {
        conversation_id: String,
        user_id: String,
    },

    /// Ask which of the given user ids are online. Answered directly to
    /// the asking connection, from this process's registry only.
    #[serde(rename = "users:online:check")]
    UsersOnlineCheck(Vec<String>),
}

/// Frames the server emits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Presence edge for a user.
    #[serde(rename = "user:status", rename_all = "camelCase")]
    UserStatus { user_id: String, online: bool },

    /// A persisted project message, passed through as stored.
    #[serde(rename = "message:new")]
    MessageNew(Value),

    /// A persisted team message, passed through as stored.
    #[serde(rename = "team:message:new")]
    TeamMessageNew(Value),

    /// A persisted direct message, passed through as stored.
    #[serde(rename = "dm:new")]
    DmNew(Value),

    /// Best-effort nudge to the receiver's personal room.
    #[serde(rename = "dm:notification", rename_all = "camelCase")]
    DmNotification {
        conversation_id: String,
        sender_id: String,
        preview: String,
    },

    /// Read receipt for a direct conversation.
    #[serde(rename = "dm:read", rename_all = "camelCase")]
    DmRead {
        conversation_id: String,
        read_by: String,
    },

    /// Typing indicator inside a project room.
    #[serde(rename = "typing:user", rename_all = "camelCase")]
    TypingUser { user_id: String, is_typing: bool },

    /// Typing indicator inside a direct conversation.
    #[serde(rename = "dm:typing", rename_all = "camelCase")]
    DmTyping { user_id: String, is_typing: bool },

    /// Answer to a `users:online:check` query.
    #[serde(rename = "users:online:status")]
    UsersOnlineStatus(Vec<UserOnlineStatus>),

    /// Operation failure reported to the originating connection only.
    #[serde(rename = "error")]
    Error { message: String },
}

/// One entry in a `users:online:status` answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOnlineStatus {
    /// The queried user id.
    pub user_id: String,
    /// Whether that user has a live connection in the answering process.
    pub online: bool,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn client_events_parse_from_envelopes() {
        let ev: ClientEvent =
            serde_json::from_value(json!({"event": "user:online", "data": "u1"})).unwrap();
        assert!(matches!(ev, ClientEvent::UserOnline(id) if id == "u1"));

        let ev: ClientEvent = serde_json::from_value(json!({
            "event": "message:send",
            "data": {"content": "hi", "projectId": "p1", "userId": "u1"}
        }))
        .unwrap();
        match ev {
            ClientEvent::MessageSend {
                content,
                project_id,
                user_id,
            } => {
                assert_eq!(content, "hi");
                assert_eq!(project_id, "p1");
                assert_eq!(user_id, "u1");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let ev: ClientEvent = serde_json::from_value(json!({
            "event": "team:message:send",
            "data": {"content": "hi", "teamId": "t1", "userId": "u1"}
        }))
        .unwrap();
        assert!(matches!(
            ev,
            ClientEvent::TeamMessageSend { ref team_id, .. } if team_id == "t1"
        ));
    }

    #[test]
    fn unknown_event_names_are_rejected() {
        let result: Result<ClientEvent, _> =
            serde_json::from_value(json!({"event": "admin:drop-tables", "data": null}));
        assert!(result.is_err());
    }

    #[test]
    fn server_events_serialize_camel_case() {
        let frame = serde_json::to_value(ServerEvent::UserStatus {
            user_id: "u1".into(),
            online: true,
        })
        .unwrap();
        assert_eq!(
            frame,
            json!({"event": "user:status", "data": {"userId": "u1", "online": true}})
        );
    }
}
