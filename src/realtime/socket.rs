//! WebSocket endpoint bridging sockets to the hub.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};

use super::hub::ChatHub;
use super::protocol::ClientEvent;

/// Router exposing the realtime socket at `/ws`.
pub fn router(hub: Arc<ChatHub>) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(hub)
}

async fn ws_handler(State(hub): State<Arc<ChatHub>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: Arc<ChatHub>) {
    let (conn, mut outbound) = hub.connect();
    let (mut sink, mut stream) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let frame = match serde_json::to_string(&event) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "outbound frame encode failed");
                    continue;
                }
            };
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let hub_for_recv = Arc::clone(&hub);
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => hub_for_recv.handle_event(conn, event).await,
                    Err(e) => debug!(connection = %conn, error = %e, "ignoring malformed frame"),
                },
                Message::Close(_) => break,
                // Pings are answered by axum; binary frames are not part
                // of the protocol
                _ => {}
            }
        }
    });

    // Whichever side finishes first tears the other down
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    hub.disconnect(conn).await;
}
