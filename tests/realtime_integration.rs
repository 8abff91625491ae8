//! Cross-instance realtime tests: two hubs sharing one backplane, plus a
//! live WebSocket round trip through the gateway router.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::time::timeout;

use quorum_gateway::Result;
use quorum_gateway::realtime::{
    Backplane, ChatHub, ClientEvent, LocalBackplane, MessageStore, ServerEvent, socket,
};

const WAIT: Duration = Duration::from_secs(1);

struct NullStore;

#[async_trait]
impl MessageStore for NullStore {
    async fn save_project_message(
        &self,
        project_id: &str,
        user_id: &str,
        content: &str,
    ) -> Result<Value> {
        Ok(json!({
            "projectId": project_id,
            "userId": user_id,
            "content": content,
        }))
    }

    async fn save_team_message(
        &self,
        team_id: &str,
        user_id: &str,
        content: &str,
    ) -> Result<Value> {
        Ok(json!({
            "teamId": team_id,
            "userId": user_id,
            "content": content,
        }))
    }

    async fn save_direct_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<Value> {
        Ok(json!({
            "conversationId": conversation_id,
            "senderId": sender_id,
            "content": content,
        }))
    }

    async fn mark_read(&self, _conversation_id: &str, _user_id: &str) -> Result<()> {
        Ok(())
    }
}

fn hub_pair() -> (Arc<ChatHub>, Arc<ChatHub>) {
    let backplane: Arc<dyn Backplane> = Arc::new(LocalBackplane::new());
    let a = ChatHub::start(Arc::clone(&backplane), Arc::new(NullStore));
    let b = ChatHub::start(backplane, Arc::new(NullStore));
    (a, b)
}

#[tokio::test]
async fn presence_edges_cross_the_backplane() {
    let (hub_a, hub_b) = hub_pair();

    let (remote_watcher, mut watcher_rx) = hub_b.connect();
    hub_b
        .handle_event(remote_watcher, ClientEvent::UserOnline("watcher".into()))
        .await;
    let _ = timeout(WAIT, watcher_rx.recv()).await.unwrap();

    let (conn, _rx) = hub_a.connect();
    hub_a
        .handle_event(conn, ClientEvent::UserOnline("u1".into()))
        .await;

    let frame = timeout(WAIT, watcher_rx.recv()).await.unwrap().unwrap();
    assert!(matches!(
        frame,
        ServerEvent::UserStatus { ref user_id, online: true } if user_id == "u1"
    ));

    hub_a.disconnect(conn).await;
    let frame = timeout(WAIT, watcher_rx.recv()).await.unwrap().unwrap();
    assert!(matches!(
        frame,
        ServerEvent::UserStatus { ref user_id, online: false } if user_id == "u1"
    ));
}

#[tokio::test]
async fn room_fanout_reaches_remote_members_only() {
    let (hub_a, hub_b) = hub_pair();

    let (sender, _sender_rx) = hub_a.connect();
    hub_a
        .handle_event(sender, ClientEvent::JoinProject("p1".into()))
        .await;

    let (remote_member, mut member_rx) = hub_b.connect();
    hub_b
        .handle_event(remote_member, ClientEvent::JoinProject("p1".into()))
        .await;
    let (remote_outsider, mut outsider_rx) = hub_b.connect();
    hub_b
        .handle_event(remote_outsider, ClientEvent::JoinProject("p2".into()))
        .await;

    hub_a
        .handle_event(
            sender,
            ClientEvent::MessageSend {
                content: "hello".into(),
                project_id: "p1".into(),
                user_id: "u1".into(),
            },
        )
        .await;

    let frame = timeout(WAIT, member_rx.recv()).await.unwrap().unwrap();
    let ServerEvent::MessageNew(message) = frame else {
        panic!("expected message:new, got {frame:?}");
    };
    assert_eq!(message["content"], json!("hello"));

    // Give the relay a chance to misdeliver before asserting silence
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(outsider_rx.try_recv().is_err());
}

#[tokio::test]
async fn local_members_receive_exactly_one_copy() {
    let (hub_a, _hub_b) = hub_pair();

    let (sender, _sender_rx) = hub_a.connect();
    let (peer, mut peer_rx) = hub_a.connect();
    hub_a
        .handle_event(sender, ClientEvent::JoinProject("p1".into()))
        .await;
    hub_a
        .handle_event(peer, ClientEvent::JoinProject("p1".into()))
        .await;

    hub_a
        .handle_event(
            sender,
            ClientEvent::MessageSend {
                content: "once".into(),
                project_id: "p1".into(),
                user_id: "u1".into(),
            },
        )
        .await;

    let frame = timeout(WAIT, peer_rx.recv()).await.unwrap().unwrap();
    assert!(matches!(frame, ServerEvent::MessageNew(_)));

    // The hub's own frame comes back over the shared backplane; the origin
    // check must drop it.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(peer_rx.try_recv().is_err(), "duplicate delivery");
}

#[tokio::test]
async fn online_check_reflects_only_the_local_process() {
    let (hub_a, hub_b) = hub_pair();

    let (remote, _rx) = hub_b.connect();
    hub_b
        .handle_event(remote, ClientEvent::UserOnline("far-away".into()))
        .await;

    let (asker, mut asker_rx) = hub_a.connect();
    hub_a
        .handle_event(asker, ClientEvent::UsersOnlineCheck(vec!["far-away".into()]))
        .await;

    // Presence registries are per-process; the check answers from local
    // truth even though the presence broadcast crossed the backplane.
    loop {
        let frame = timeout(WAIT, asker_rx.recv()).await.unwrap().unwrap();
        if let ServerEvent::UsersOnlineStatus(statuses) = frame {
            assert_eq!(statuses.len(), 1);
            assert!(!statuses[0].online);
            break;
        }
    }
}

#[tokio::test]
async fn team_broadcast_reaches_joined_sockets_only() {
    use futures::{SinkExt, StreamExt};
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message;

    let backplane: Arc<dyn Backplane> = Arc::new(LocalBackplane::new());
    let hub = ChatHub::start(backplane, Arc::new(NullStore));
    let app = socket::router(hub);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let (mut first, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    let (mut second, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    let (mut bystander, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();

    let join = json!({"event": "join:team", "data": "T1"}).to_string();
    first.send(Message::text(join.clone())).await.unwrap();
    second.send(Message::text(join)).await.unwrap();
    // Joins are processed in order per socket, so the send below cannot
    // outrun the first socket's own join. Give the second one a beat.
    tokio::time::sleep(Duration::from_millis(100)).await;

    first
        .send(Message::text(
            json!({
                "event": "team:message:send",
                "data": {"content": "standup in 5", "teamId": "T1", "userId": "u1"}
            })
            .to_string(),
        ))
        .await
        .unwrap();

    for socket in [&mut first, &mut second] {
        let raw = timeout(WAIT, socket.next()).await.unwrap().unwrap().unwrap();
        let Message::Text(text) = raw else {
            panic!("expected a text frame, got {raw:?}");
        };
        let frame: Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(frame["event"], json!("team:message:new"));
        assert_eq!(frame["data"]["teamId"], json!("T1"));
        assert_eq!(frame["data"]["content"], json!("standup in 5"));
    }

    assert!(
        timeout(Duration::from_millis(200), bystander.next())
            .await
            .is_err(),
        "socket outside the room must stay silent"
    );
}

#[tokio::test]
async fn websocket_round_trip_through_the_router() {
    use futures::{SinkExt, StreamExt};
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message;

    let backplane: Arc<dyn Backplane> = Arc::new(LocalBackplane::new());
    let hub = ChatHub::start(backplane, Arc::new(NullStore));
    let app = socket::router(Arc::clone(&hub));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // A second in-process connection observes what the socket client does
    let (watcher, mut watcher_rx) = hub.connect();
    hub.handle_event(watcher, ClientEvent::UserOnline("watcher".into()))
        .await;
    let _ = timeout(WAIT, watcher_rx.recv()).await.unwrap();

    let (mut socket, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    socket
        .send(Message::text(
            json!({"event": "user:online", "data": "u1"}).to_string(),
        ))
        .await
        .unwrap();

    // The watcher sees the socket user's online edge
    let frame = timeout(WAIT, watcher_rx.recv()).await.unwrap().unwrap();
    assert!(matches!(
        frame,
        ServerEvent::UserStatus { ref user_id, online: true } if user_id == "u1"
    ));

    // The socket client sees its own edge too, as JSON over the wire
    let raw = timeout(WAIT, socket.next()).await.unwrap().unwrap().unwrap();
    let Message::Text(text) = raw else {
        panic!("expected a text frame, got {raw:?}");
    };
    let frame: Value = serde_json::from_str(text.as_str()).unwrap();
    assert_eq!(
        frame,
        json!({"event": "user:status", "data": {"userId": "u1", "online": true}})
    );

    // Closing the socket drops the last connection and broadcasts offline
    socket.close(None).await.unwrap();
    let frame = timeout(WAIT, watcher_rx.recv()).await.unwrap().unwrap();
    assert!(matches!(
        frame,
        ServerEvent::UserStatus { ref user_id, online: false } if user_id == "u1"
    ));
}
