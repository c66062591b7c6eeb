use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AidRequestStatus {
    Pending,
    Accepted,
    InTransit,
    Completed,
}

impl AidRequestStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Some(AidRequestStatus::Pending),
            "ACCEPTED" => Some(AidRequestStatus::Accepted),
            "IN_TRANSIT" => Some(AidRequestStatus::InTransit),
            "COMPLETED" => Some(AidRequestStatus::Completed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AidRequestStatus::Pending => "PENDING",
            AidRequestStatus::Accepted => "ACCEPTED",
            AidRequestStatus::InTransit => "IN_TRANSIT",
            AidRequestStatus::Completed => "COMPLETED",
        }
    }

    /// A request a driver is currently working on.
    pub fn is_active(self) -> bool {
        matches!(self, AidRequestStatus::Accepted | AidRequestStatus::InTransit)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AidRequest {
    pub id: String,
    pub sender_id: String,
    pub driver_id: Option<String>,
    pub aid_type: String,
    pub description: String,
    pub quantity: String,
    pub destination: String,
    pub status: AidRequestStatus,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
}

impl AidRequest {
    /// Accounts with a legitimate interest in this request's live events.
    pub fn is_party(&self, user_id: &str) -> bool {
        self.sender_id == user_id || self.driver_id.as_deref() == Some(user_id)
    }
}

#[derive(Debug, Clone)]
pub struct CreateAidRequest {
    pub sender_id: String,
    pub aid_type: String,
    pub description: String,
    pub quantity: String,
    pub destination: String,
}
