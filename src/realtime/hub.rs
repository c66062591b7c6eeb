//! Process-local registry of live connections and the rooms they joined.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{Broadcaster, RelayError, Room, ServerEvent};

pub type ConnectionId = Uuid;

/// Serialized frames waiting to be written to one socket.
pub type Outbox = mpsc::UnboundedReceiver<String>;

struct Connection {
    user_id: String,
    sender: mpsc::UnboundedSender<String>,
    rooms: HashSet<Room>,
}

#[derive(Default)]
struct HubInner {
    connections: HashMap<ConnectionId, Connection>,
    rooms: HashMap<Room, HashSet<ConnectionId>>,
}

/// Delivers room broadcasts to the connections attached to this process.
///
/// The lock is never held across an await point; delivery only pushes onto
/// unbounded per-connection channels.
#[derive(Default)]
pub struct RoomHub {
    inner: RwLock<HubInner>,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new connection for `user_id`; the returned outbox yields frames to send.
    pub fn register(&self, user_id: &str) -> (ConnectionId, Outbox) {
        let id = Uuid::new_v4();
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.connections.insert(
            id,
            Connection {
                user_id: user_id.to_string(),
                sender,
                rooms: HashSet::new(),
            },
        );
        (id, receiver)
    }

    /// Add a registered connection to a room. Returns false for unknown connections.
    pub fn join(&self, connection: ConnectionId, room: Room) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let Some(conn) = inner.connections.get_mut(&connection) else {
            return false;
        };
        conn.rooms.insert(room.clone());
        inner.rooms.entry(room).or_default().insert(connection);
        true
    }

    /// Detach a connection and drop it from every room it joined.
    pub fn unregister(&self, connection: ConnectionId) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        remove_connection(&mut inner, connection);
    }

    pub fn is_member(&self, connection: ConnectionId, room: &Room) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .rooms
            .get(room)
            .is_some_and(|members| members.contains(&connection))
    }

    pub fn room_size(&self, room: &Room) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.rooms.get(room).map_or(0, HashSet::len)
    }

    pub fn connection_count(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.connections.len()
    }

    /// Push `event` to every local member of `room`. Returns the number of
    /// connections reached; connections whose socket task has ended are pruned.
    pub fn deliver(&self, room: &Room, event: &ServerEvent) -> Result<usize, RelayError> {
        let frame = serde_json::to_string(event)?;
        let mut delivered = 0;
        let mut closed = Vec::new();

        {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(members) = inner.rooms.get(room) {
                for id in members {
                    let Some(conn) = inner.connections.get(id) else {
                        continue;
                    };
                    if conn.sender.send(frame.clone()).is_ok() {
                        delivered += 1;
                    } else {
                        closed.push(*id);
                    }
                }
            }
        }

        if !closed.is_empty() {
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            for id in closed {
                remove_connection(&mut inner, id);
            }
        }

        tracing::debug!(
            "Delivered {} to {} local connection(s) in {}",
            event.name(),
            delivered,
            room
        );
        Ok(delivered)
    }
}

fn remove_connection(inner: &mut HubInner, connection: ConnectionId) {
    let Some(conn) = inner.connections.remove(&connection) else {
        return;
    };
    tracing::debug!("Detached connection {} of user {}", connection, conn.user_id);
    for room in conn.rooms {
        if let Some(members) = inner.rooms.get_mut(&room) {
            members.remove(&connection);
            if members.is_empty() {
                inner.rooms.remove(&room);
            }
        }
    }
}

#[async_trait]
impl Broadcaster for RoomHub {
    async fn emit(&self, room: &Room, event: &ServerEvent) -> Result<(), RelayError> {
        self.deliver(room, event).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::events::MilestoneReported;

    fn milestone(text: &str) -> ServerEvent {
        ServerEvent::MilestoneReported(MilestoneReported {
            milestone: text.to_string(),
        })
    }

    #[test]
    fn delivers_only_to_room_members() {
        let hub = RoomHub::new();
        let (a, mut a_rx) = hub.register("sender");
        let (_b, mut b_rx) = hub.register("stranger");
        let room = Room::AidRequest("r1".to_string());
        assert!(hub.join(a, room.clone()));

        let reached = hub.deliver(&room, &milestone("loaded")).unwrap();
        assert_eq!(reached, 1);

        let frame = a_rx.try_recv().unwrap();
        assert!(frame.contains("milestoneReported"));
        assert!(a_rx.try_recv().is_err());
        assert!(b_rx.try_recv().is_err());
    }

    #[test]
    fn unregister_leaves_all_rooms() {
        let hub = RoomHub::new();
        let (a, _rx) = hub.register("driver");
        let r1 = Room::AidRequest("r1".to_string());
        let r2 = Room::User("driver".to_string());
        hub.join(a, r1.clone());
        hub.join(a, r2.clone());
        assert_eq!(hub.room_size(&r1), 1);

        hub.unregister(a);
        assert_eq!(hub.room_size(&r1), 0);
        assert_eq!(hub.room_size(&r2), 0);
        assert_eq!(hub.connection_count(), 0);
        assert!(!hub.join(a, r1));
    }

    #[test]
    fn closed_outboxes_are_pruned() {
        let hub = RoomHub::new();
        let (a, rx) = hub.register("gone");
        let room = Room::User("gone".to_string());
        hub.join(a, room.clone());
        drop(rx);

        assert_eq!(hub.deliver(&room, &milestone("x")).unwrap(), 0);
        assert_eq!(hub.connection_count(), 0);
        assert!(!hub.is_member(a, &room));
    }

    #[test]
    fn empty_room_is_not_an_error() {
        let hub = RoomHub::new();
        let room = Room::AidRequest("nobody".to_string());
        assert_eq!(hub.deliver(&room, &milestone("x")).unwrap(), 0);
    }
}
