//! Per-connection WebSocket loop.
//!
//! Framing and heartbeats stay here; event semantics live in [`Relay`]. The
//! server pings every `SOCKET_HEARTBEAT_SECONDS` and drops a client that has sent
//! nothing (not even a pong) for `SOCKET_CLIENT_TIMEOUT_SECONDS`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::time;

use super::{Peer, Relay, Room};
use crate::db::User;
use crate::AppState;

enum Shutdown {
    ClientClosed,
    StreamEnded,
    HeartbeatTimeout,
    Protocol(axum::Error),
    SendFailed(axum::Error),
    HubDetached,
}

pub async fn run(socket: WebSocket, state: Arc<AppState>, user: User) {
    let heartbeat_every = Duration::from_secs(state.config.socket.heartbeat_seconds.max(1));
    let client_timeout = Duration::from_secs(state.config.socket.client_timeout_seconds.max(1));

    let (connection, mut outbox) = state.hub.register(&user.id);
    state.hub.join(connection, Room::User(user.id.clone()));
    let peer = Peer {
        connection,
        user_id: user.id.clone(),
        role: user.role,
    };
    let relay = Relay::from_state(&state);
    tracing::info!("{} {} connected ({})", user.role, user.id, connection);

    let (mut sink, mut stream) = socket.split();
    let mut heartbeat = time::interval(heartbeat_every);
    heartbeat.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    let mut last_seen = Instant::now();

    let reason = loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if last_seen.elapsed() > client_timeout {
                    break Shutdown::HeartbeatTimeout;
                }
                if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                    break Shutdown::SendFailed(e);
                }
            }
            frame = outbox.recv() => {
                let Some(frame) = frame else {
                    break Shutdown::HubDetached;
                };
                if let Err(e) = sink.send(Message::Text(frame)).await {
                    break Shutdown::SendFailed(e);
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        last_seen = Instant::now();
                        relay.handle_text(&peer, &text).await;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        last_seen = Instant::now();
                        tracing::warn!("Ignoring binary frame from {}", peer.user_id);
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        last_seen = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) => break Shutdown::ClientClosed,
                    Some(Err(e)) => break Shutdown::Protocol(e),
                    None => break Shutdown::StreamEnded,
                }
            }
        }
    };

    state.hub.unregister(connection);
    match reason {
        Shutdown::ClientClosed | Shutdown::StreamEnded => {
            tracing::info!("{} disconnected ({})", peer.user_id, connection)
        }
        Shutdown::HeartbeatTimeout => {
            tracing::info!("{} timed out ({})", peer.user_id, connection);
            let _ = sink.send(Message::Close(None)).await;
        }
        Shutdown::Protocol(e) => {
            tracing::warn!("Protocol error on {} ({}): {}", peer.user_id, connection, e)
        }
        Shutdown::SendFailed(e) => {
            tracing::debug!("Write to {} failed ({}): {}", peer.user_id, connection, e)
        }
        Shutdown::HubDetached => {
            tracing::debug!("Connection {} of {} detached from hub", connection, peer.user_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use futures::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    use crate::config::Config;
    use crate::db::{AidRequestRepository, Location, RegistrationStatus, Role, UserRepository};
    use crate::realtime::{Room, RoomHub};
    use crate::services::auth::AuthService;
    use crate::test_support::{seed_aid_request, seed_user, test_pool};
    use crate::AppState;

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn serve(config: Config) -> (SocketAddr, Arc<AppState>, Arc<RoomHub>) {
        let hub = Arc::new(RoomHub::new());
        let state = Arc::new(AppState {
            db: test_pool().await,
            config,
            broadcaster: hub.clone(),
            hub: hub.clone(),
        });
        let app = crate::routes::router(state.clone(), crate::routes::auth::router());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, state, hub)
    }

    async fn eventually(what: &str, check: impl Fn() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("timed out waiting for {}", what);
    }

    async fn next_event(client: &mut Client) -> Value {
        let frame = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match client.next().await.expect("socket open").expect("frame") {
                    Message::Text(text) => return text,
                    Message::Ping(_) | Message::Pong(_) => continue,
                    other => panic!("expected a text frame, got {:?}", other),
                }
            }
        })
        .await
        .expect("event within 5s");
        serde_json::from_str(&frame).unwrap()
    }

    #[tokio::test]
    async fn location_update_travels_between_two_sockets() {
        let (addr, state, hub) = serve(Config::for_tests()).await;
        let sender = seed_user(&state.db, "s@ngo.org", Role::Sender, RegistrationStatus::Approved).await;
        let driver =
            seed_user(&state.db, "d@trucks.et", Role::Driver, RegistrationStatus::Approved).await;
        let request = seed_aid_request(&state.db, &sender.id).await;
        AidRequestRepository::accept(&state.db, &request.id, &driver.id)
            .await
            .unwrap()
            .unwrap();

        // Sender authenticates through the query string, the driver through the header.
        let sender_token = AuthService::create_jwt(&state, &sender).unwrap();
        let (mut sender_ws, _) =
            connect_async(format!("ws://{}/socket?token={}", addr, sender_token))
                .await
                .unwrap();

        let mut upgrade = format!("ws://{}/socket", addr).into_client_request().unwrap();
        let driver_token = AuthService::create_jwt(&state, &driver).unwrap();
        upgrade.headers_mut().insert(
            "authorization",
            format!("Bearer {}", driver_token).parse().unwrap(),
        );
        let (mut driver_ws, _) = connect_async(upgrade).await.unwrap();

        eventually("both connections", || hub.connection_count() == 2).await;
        assert_eq!(hub.room_size(&Room::User(sender.id.clone())), 1);
        assert_eq!(hub.room_size(&Room::User(driver.id.clone())), 1);

        let aid_room = Room::AidRequest(request.id.clone());
        sender_ws
            .send(Message::Text(
                json!({ "event": "joinAidRequestRoom", "data": request.id }).to_string(),
            ))
            .await
            .unwrap();
        eventually("the room join", || hub.room_size(&aid_room) == 1).await;

        driver_ws
            .send(Message::Text(
                json!({
                    "event": "driver:locationUpdate",
                    "data": {
                        "driverId": driver.id,
                        "aidRequestId": request.id,
                        "location": { "lat": 9.03, "lng": 38.74 }
                    }
                })
                .to_string(),
            ))
            .await
            .unwrap();

        let event = next_event(&mut sender_ws).await;
        assert_eq!(event["event"], "locationUpdated");
        assert_eq!(event["data"]["driverId"], driver.id.as_str());
        assert_eq!(event["data"]["location"]["lat"], 9.03);

        let stored = UserRepository::find_by_id(&state.db, &driver.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            stored.truck_details.unwrap().location,
            Some(Location { lat: 9.03, lng: 38.74 })
        );

        sender_ws.close(None).await.unwrap();
        eventually("the sender to leave", || hub.connection_count() == 1).await;
        assert_eq!(hub.room_size(&aid_room), 0);
        assert_eq!(hub.room_size(&Room::User(sender.id.clone())), 0);

        driver_ws.close(None).await.unwrap();
        eventually("the driver to leave", || hub.connection_count() == 0).await;
    }

    #[tokio::test]
    async fn silent_client_is_dropped_after_timeout() {
        let mut config = Config::for_tests();
        config.socket.heartbeat_seconds = 1;
        config.socket.client_timeout_seconds = 1;
        let (addr, state, hub) = serve(config).await;
        let sender = seed_user(&state.db, "s@ngo.org", Role::Sender, RegistrationStatus::Approved).await;
        let token = AuthService::create_jwt(&state, &sender).unwrap();

        // Never read, so the server's pings go unanswered.
        let (_quiet, _) = connect_async(format!("ws://{}/socket?token={}", addr, token))
            .await
            .unwrap();
        eventually("the connection", || hub.connection_count() == 1).await;

        eventually("the idle connection to be dropped", || hub.connection_count() == 0).await;
        assert_eq!(hub.room_size(&Room::User(sender.id.clone())), 0);
    }
}
