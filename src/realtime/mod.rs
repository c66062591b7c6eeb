//! Real-time relay: room-scoped WebSocket broadcasts, replicated across
//! processes through a Redis pub/sub channel.
//!
//! Request handlers never own the transport. They receive a [`Broadcaster`]
//! (the local [`RoomHub`] or the [`RedisFanout`] wrapping it) and address events
//! to a [`Room`]. There is no way to emit to every connection.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub mod events;
pub mod fanout;
pub mod hub;
pub mod relay;
pub mod session;

pub use events::{ClientEvent, ServerEvent};
pub use fanout::RedisFanout;
pub use hub::{ConnectionId, RoomHub};
pub use relay::{Peer, Relay};

/// A named subscription group. Broadcasts reach only connections that joined it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Room {
    /// Parties to a single aid request (its sender and assigned driver).
    AidRequest(String),
    /// Every live connection of one account.
    User(String),
}

const AID_REQUEST_PREFIX: &str = "aid_request:";
const USER_PREFIX: &str = "user:";

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::AidRequest(id) => write!(f, "{}{}", AID_REQUEST_PREFIX, id),
            Room::User(id) => write!(f, "{}{}", USER_PREFIX, id),
        }
    }
}

impl From<Room> for String {
    fn from(room: Room) -> Self {
        room.to_string()
    }
}

impl TryFrom<String> for Room {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if let Some(id) = value.strip_prefix(AID_REQUEST_PREFIX) {
            if !id.is_empty() {
                return Ok(Room::AidRequest(id.to_string()));
            }
        }
        if let Some(id) = value.strip_prefix(USER_PREFIX) {
            if !id.is_empty() {
                return Ok(Room::User(id.to_string()));
            }
        }
        Err(format!("Invalid room name: {}", value))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("not permitted: {0}")]
    Forbidden(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("broker error: {0}")]
    Broker(#[from] redis::RedisError),

    #[error(transparent)]
    App(#[from] AppError),
}

impl RelayError {
    /// Errors caused by what a client sent, as opposed to a server-side failure.
    pub fn is_client_fault(&self) -> bool {
        match self {
            RelayError::InvalidPayload(_) | RelayError::Forbidden(_) => true,
            RelayError::App(e) => matches!(
                e,
                AppError::Forbidden(_)
                    | AppError::NotFound(_)
                    | AppError::BadRequest(_)
                    | AppError::Validation(_)
                    | AppError::Conflict(_)
            ),
            RelayError::Serialization(_) | RelayError::Broker(_) => false,
        }
    }
}

/// Capability to publish an event to a room without owning the transport.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn emit(&self, room: &Room, event: &ServerEvent) -> Result<(), RelayError>;
}
