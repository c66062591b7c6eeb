//! Wire-level event definitions for the WebSocket relay.
//!
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}`. Inbound
//! payload fields are optional so that an incomplete event can be reported and
//! dropped instead of failing deserialization wholesale.

use serde::{Deserialize, Serialize};

use crate::db::{AidRequestStatus, Location, Notification};

/// Events sent by clients.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "joinAidRequestRoom")]
    JoinAidRequestRoom(String),

    #[serde(rename = "driver:locationUpdate")]
    DriverLocationUpdate(LocationUpdatePayload),

    #[serde(rename = "driver:milestone")]
    DriverMilestone(MilestonePayload),

    #[serde(rename = "aidRequestCreated")]
    AidRequestCreated(AidRequestCreatedPayload),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdatePayload {
    pub driver_id: Option<String>,
    pub aid_request_id: Option<String>,
    pub location: Option<Location>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestonePayload {
    pub aid_request_id: Option<String>,
    pub milestone: Option<String>,
}

/// Only the request id is trusted; the server reloads the request itself.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AidRequestCreatedPayload {
    #[serde(alias = "_id")]
    pub id: Option<String>,
}

/// Events pushed to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "locationUpdated")]
    LocationUpdated(LocationUpdated),

    #[serde(rename = "milestoneReported")]
    MilestoneReported(MilestoneReported),

    #[serde(rename = "aidRequestStatusChanged")]
    AidRequestStatusChanged(AidRequestStatusChanged),

    #[serde(rename = "newNotification")]
    NewNotification(Notification),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdated {
    pub driver_id: String,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneReported {
    pub milestone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AidRequestStatusChanged {
    pub aid_request_id: String,
    pub status: AidRequestStatus,
    pub driver_id: Option<String>,
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::LocationUpdated(_) => "locationUpdated",
            ServerEvent::MilestoneReported(_) => "milestoneReported",
            ServerEvent::AidRequestStatusChanged(_) => "aidRequestStatusChanged",
            ServerEvent::NewNotification(_) => "newNotification",
        }
    }
}

/// Treat blank strings the same as absent fields.
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
