//! Handling of inbound client events.
//!
//! Each frame is processed on its originating connection's task, in arrival
//! order. Nothing is ever sent back to the originating client as a reply: bad
//! frames are logged and dropped and the connection stays open.

use std::sync::Arc;

use sqlx::SqlitePool;

use super::events::{
    non_blank, AidRequestCreatedPayload, LocationUpdatePayload, MilestonePayload,
    MilestoneReported,
};
use super::{Broadcaster, ClientEvent, ConnectionId, RelayError, Room, RoomHub, ServerEvent};
use crate::db::{AidRequest, AidRequestRepository, Role};
use crate::services::notifications::NotificationService;
use crate::services::tracking::TrackingService;
use crate::AppState;

/// The authenticated account behind one live connection.
#[derive(Debug, Clone)]
pub struct Peer {
    pub connection: ConnectionId,
    pub user_id: String,
    pub role: Role,
}

#[derive(Clone)]
pub struct Relay {
    db: SqlitePool,
    broadcaster: Arc<dyn Broadcaster>,
    hub: Arc<RoomHub>,
}

impl Relay {
    pub fn new(db: SqlitePool, broadcaster: Arc<dyn Broadcaster>, hub: Arc<RoomHub>) -> Self {
        Self {
            db,
            broadcaster,
            hub,
        }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(state.db.clone(), state.broadcaster.clone(), state.hub.clone())
    }

    /// Process one text frame from `peer`.
    pub async fn handle_text(&self, peer: &Peer, text: &str) {
        if let Err(e) = self.dispatch(peer, text).await {
            if e.is_client_fault() {
                tracing::warn!("Dropped event from {}: {}", peer.user_id, e);
            } else {
                tracing::error!("Failed to handle event from {}: {}", peer.user_id, e);
            }
        }
    }

    async fn dispatch(&self, peer: &Peer, text: &str) -> Result<(), RelayError> {
        let event: ClientEvent = serde_json::from_str(text)
            .map_err(|e| RelayError::InvalidPayload(e.to_string()))?;

        match event {
            ClientEvent::JoinAidRequestRoom(id) => self.join_aid_request_room(peer, id).await,
            ClientEvent::DriverLocationUpdate(payload) => self.location_update(peer, payload).await,
            ClientEvent::DriverMilestone(payload) => self.milestone(peer, payload).await,
            ClientEvent::AidRequestCreated(payload) => self.aid_request_created(peer, payload).await,
        }
    }

    async fn join_aid_request_room(&self, peer: &Peer, id: String) -> Result<(), RelayError> {
        let id = non_blank(Some(id)).ok_or_else(|| {
            RelayError::InvalidPayload("joinAidRequestRoom requires a request id".to_string())
        })?;
        let request = self.load_request(&id).await?;
        if !request.is_party(&peer.user_id) {
            return Err(RelayError::Forbidden(format!(
                "{} is not a party to aid request {}",
                peer.user_id, id
            )));
        }

        let room = Room::AidRequest(request.id);
        if self.hub.is_member(peer.connection, &room) {
            return Ok(());
        }
        if self.hub.join(peer.connection, room.clone()) {
            tracing::debug!(
                "{} joined {} ({} member(s))",
                peer.user_id,
                room,
                self.hub.room_size(&room)
            );
        }
        Ok(())
    }

    async fn location_update(
        &self,
        peer: &Peer,
        payload: LocationUpdatePayload,
    ) -> Result<(), RelayError> {
        require_driver(peer, "driver:locationUpdate")?;
        let (Some(driver_id), Some(aid_request_id), Some(location)) = (
            non_blank(payload.driver_id),
            non_blank(payload.aid_request_id),
            payload.location,
        ) else {
            return Err(RelayError::InvalidPayload(
                "driver:locationUpdate requires driverId, aidRequestId and location".to_string(),
            ));
        };

        if driver_id != peer.user_id {
            return Err(RelayError::Forbidden(format!(
                "{} cannot report the location of {}",
                peer.user_id, driver_id
            )));
        }
        if !location.is_valid() {
            return Err(RelayError::InvalidPayload("location is out of range".to_string()));
        }

        TrackingService::report_location(
            &self.db,
            self.broadcaster.as_ref(),
            &driver_id,
            &aid_request_id,
            location,
        )
        .await?;
        Ok(())
    }

    async fn milestone(&self, peer: &Peer, payload: MilestonePayload) -> Result<(), RelayError> {
        require_driver(peer, "driver:milestone")?;
        let (Some(aid_request_id), Some(milestone)) =
            (non_blank(payload.aid_request_id), non_blank(payload.milestone))
        else {
            return Err(RelayError::InvalidPayload(
                "driver:milestone requires aidRequestId and milestone".to_string(),
            ));
        };

        let request = self.load_request(&aid_request_id).await?;
        if request.driver_id.as_deref() != Some(peer.user_id.as_str()) {
            return Err(RelayError::Forbidden(format!(
                "{} is not the driver of aid request {}",
                peer.user_id, aid_request_id
            )));
        }

        let room = Room::AidRequest(request.id);
        let event = ServerEvent::MilestoneReported(MilestoneReported { milestone });
        self.broadcaster.emit(&room, &event).await
    }

    /// The payload only identifies the request; sender and content come from the store.
    async fn aid_request_created(
        &self,
        peer: &Peer,
        payload: AidRequestCreatedPayload,
    ) -> Result<(), RelayError> {
        let id = non_blank(payload.id).ok_or_else(|| {
            RelayError::InvalidPayload("aidRequestCreated requires the request id".to_string())
        })?;
        let request = self.load_request(&id).await?;
        if request.sender_id != peer.user_id {
            return Err(RelayError::Forbidden(format!(
                "{} did not create aid request {}",
                peer.user_id, id
            )));
        }

        NotificationService::notify_aid_request_created(
            &self.db,
            self.broadcaster.as_ref(),
            &request,
        )
        .await?;
        Ok(())
    }

    async fn load_request(&self, id: &str) -> Result<AidRequest, RelayError> {
        AidRequestRepository::find_by_id(&self.db, id)
            .await?
            .ok_or_else(|| RelayError::Forbidden(format!("unknown aid request {}", id)))
    }
}

fn require_driver(peer: &Peer, event: &str) -> Result<(), RelayError> {
    if peer.role != Role::Driver {
        return Err(RelayError::Forbidden(format!(
            "{} is only accepted from drivers, not {}",
            event, peer.role
        )));
    }
    Ok(())
}
