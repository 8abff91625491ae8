//! Cross-process relay for realtime events.
//!
//! Each hub instance publishes the events it originates and applies events
//! that arrive from other instances. Frames carry the origin node id so a
//! hub can drop its own echoes; both backplanes deliver to the publisher.
//! Publishing is best effort. A lost frame degrades cross-node delivery,
//! never local delivery.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use super::protocol::ServerEvent;

const CHANNEL_CAPACITY: usize = 256;
const RECONNECT_DELAY: std::time::Duration = std::time::Duration::from_secs(1);

/// One relayed frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackplaneFrame {
    /// Node that originated the frame; consumers skip their own.
    pub origin: Uuid,
    /// What to do with the frame on the receiving side.
    #[serde(flatten)]
    pub event: RelayedEvent,
}

/// Delivery scope of a relayed frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum RelayedEvent {
    /// Presence edge, fanned out to every local connection.
    Presence { user_id: String, online: bool },
    /// Fan-out to local members of a named room.
    Room { room: String, event: ServerEvent },
    /// Fan-out to every local connection.
    Global { event: ServerEvent },
}

/// Fan-out transport between hub instances.
#[async_trait]
pub trait Backplane: Send + Sync {
    /// Publish a frame to every hub instance, including this one.
    async fn publish(&self, frame: BackplaneFrame);

    /// Subscribe to the relay stream.
    fn subscribe(&self) -> broadcast::Receiver<BackplaneFrame>;
}

/// In-process backplane. Single-node deployments and tests; two hubs that
/// share one `LocalBackplane` see each other's frames.
pub struct LocalBackplane {
    tx: broadcast::Sender<BackplaneFrame>,
}

impl LocalBackplane {
    /// Create a backplane with no subscribers yet.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }
}

impl Default for LocalBackplane {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backplane for LocalBackplane {
    async fn publish(&self, frame: BackplaneFrame) {
        // Err means no subscribers, which is fine
        let _ = self.tx.send(frame);
    }

    fn subscribe(&self) -> broadcast::Receiver<BackplaneFrame> {
        self.tx.subscribe()
    }
}

/// Redis pub/sub backplane for multi-instance deployments.
pub struct RedisBackplane {
    publisher: redis::aio::ConnectionManager,
    channel: String,
    tx: broadcast::Sender<BackplaneFrame>,
}

impl RedisBackplane {
    /// Connect to Redis and start the subscriber task. The task resubscribes
    /// after connection loss instead of giving up.
    pub async fn connect(redis_url: &str, channel: &str) -> crate::Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| crate::Error::Config(format!("invalid redis url: {e}")))?;
        let publisher = redis::aio::ConnectionManager::new(client.clone())
            .await
            .map_err(|e| crate::Error::Config(format!("redis connect failed: {e}")))?;

        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        tokio::spawn(subscriber_loop(client, channel.to_string(), tx.clone()));

        Ok(Self {
            publisher,
            channel: channel.to_string(),
            tx,
        })
    }
}

async fn subscriber_loop(
    client: redis::Client,
    channel: String,
    tx: broadcast::Sender<BackplaneFrame>,
) {
    loop {
        let mut pubsub = match client.get_async_pubsub().await {
            Ok(pubsub) => pubsub,
            Err(e) => {
                warn!(error = %e, "realtime backplane subscribe failed, retrying");
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
        };
        if let Err(e) = pubsub.subscribe(&channel).await {
            warn!(error = %e, channel = %channel, "realtime backplane channel subscribe failed");
            tokio::time::sleep(RECONNECT_DELAY).await;
            continue;
        }
        debug!(channel = %channel, "realtime backplane subscribed");

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "realtime backplane payload read failed");
                    continue;
                }
            };
            match serde_json::from_str::<BackplaneFrame>(&payload) {
                Ok(frame) => {
                    let _ = tx.send(frame);
                }
                Err(e) => warn!(error = %e, "realtime backplane frame parse failed"),
            }
        }
        warn!(channel = %channel, "realtime backplane stream ended, reconnecting");
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

#[async_trait]
impl Backplane for RedisBackplane {
    async fn publish(&self, frame: BackplaneFrame) {
        let payload = match serde_json::to_string(&frame) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "realtime backplane frame encode failed");
                return;
            }
        };
        let mut conn = self.publisher.clone();
        if let Err(e) = redis::cmd("PUBLISH")
            .arg(&self.channel)
            .arg(payload)
            .query_async::<()>(&mut conn)
            .await
        {
            warn!(error = %e, channel = %self.channel, "realtime backplane publish failed");
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<BackplaneFrame> {
        self.tx.subscribe()
    }
}
