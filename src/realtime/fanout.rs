//! # Redis fan-out
//!
//! Replicates room broadcasts across every server process.
//!
//! ## Protocol
//!
//! - One pub/sub channel, [`FANOUT_CHANNEL`], shared by all processes
//! - Each message is a JSON [`Envelope`] carrying the origin node id, the room and the event
//! - The emitting process delivers to its own sockets immediately, then publishes
//! - Subscribers deliver envelopes from other nodes and skip their own, so each
//!   socket sees a broadcast exactly once
//!
//! ## Startup
//!
//! Both the publisher connection and the subscription must be established before
//! the listener is bound. [`RedisFanout::connect`] returns an error otherwise and
//! the process exits; there is no silent single-node fallback.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{Broadcaster, RelayError, Room, RoomHub, ServerEvent};

pub const FANOUT_CHANNEL: &str = "ethiosafeguard:rooms";

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    origin: String,
    room: Room,
    event: ServerEvent,
}

pub struct RedisFanout {
    node_id: String,
    hub: Arc<RoomHub>,
    publisher: ConnectionManager,
}

impl RedisFanout {
    /// Connect the publisher, subscribe to the fan-out channel and spawn the
    /// subscriber loop. The loop ends on shutdown or when the subscription drops.
    pub async fn connect(
        redis_url: &str,
        hub: Arc<RoomHub>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(Self, JoinHandle<()>), RelayError> {
        let client = redis::Client::open(redis_url)?;
        let publisher = client.get_connection_manager().await?;

        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(FANOUT_CHANNEL).await?;

        let node_id = Uuid::new_v4().to_string();
        tracing::info!("Subscribed to {} as node {}", FANOUT_CHANNEL, node_id);

        let subscriber = {
            let node_id = node_id.clone();
            let hub = hub.clone();
            tokio::spawn(async move {
                let mut messages = pubsub.into_on_message();
                loop {
                    tokio::select! {
                        _ = shutdown.recv() => {
                            tracing::info!("Fan-out subscriber exiting");
                            break;
                        }
                        msg = messages.next() => {
                            let Some(msg) = msg else {
                                tracing::error!("Redis subscription closed");
                                break;
                            };
                            let payload: String = match msg.get_payload() {
                                Ok(p) => p,
                                Err(e) => {
                                    tracing::warn!("Unreadable fan-out message: {}", e);
                                    continue;
                                }
                            };
                            if let Err(e) = route_envelope(&node_id, &hub, &payload) {
                                tracing::warn!("Dropping fan-out message: {}", e);
                            }
                        }
                    }
                }
            })
        };

        Ok((
            Self {
                node_id,
                hub,
                publisher,
            },
            subscriber,
        ))
    }
}

/// Deliver an envelope received from the broker to local sockets. Envelopes
/// published by this node were delivered at emit time and are skipped.
fn route_envelope(node_id: &str, hub: &RoomHub, payload: &str) -> Result<usize, RelayError> {
    let envelope: Envelope = serde_json::from_str(payload)?;
    if envelope.origin == node_id {
        return Ok(0);
    }
    hub.deliver(&envelope.room, &envelope.event)
}

#[async_trait]
impl Broadcaster for RedisFanout {
    async fn emit(&self, room: &Room, event: &ServerEvent) -> Result<(), RelayError> {
        self.hub.deliver(room, event)?;

        let payload = serde_json::to_string(&Envelope {
            origin: self.node_id.clone(),
            room: room.clone(),
            event: event.clone(),
        })?;
        let mut conn = self.publisher.clone();
        let receivers: i64 = conn.publish(FANOUT_CHANNEL, payload).await?;
        tracing::debug!(
            "Published {} for {} to {} subscriber(s)",
            event.name(),
            room,
            receivers
        );
        Ok(())
    }
}

/// Strip credentials from a Redis URL before logging it.
pub fn redact_redis_url(redis_url: &str) -> String {
    match url::Url::parse(redis_url) {
        Ok(url) => {
            let host = url.host_str().unwrap_or("");
            let port = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
            format!("{}://{}{}{}", url.scheme(), host, port, url.path())
        }
        Err(_) => "(redacted)".to_string(),
    }
}
