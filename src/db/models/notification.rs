use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NotificationKind {
    Success,
    Info,
    Warning,
    Error,
}

impl NotificationKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "SUCCESS" => Some(NotificationKind::Success),
            "INFO" => Some(NotificationKind::Info),
            "WARNING" => Some(NotificationKind::Warning),
            "ERROR" => Some(NotificationKind::Error),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::Success => "SUCCESS",
            NotificationKind::Info => "INFO",
            NotificationKind::Warning => "WARNING",
            NotificationKind::Error => "ERROR",
        }
    }
}

/// A message addressed to exactly one account. Only `is_read` ever changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub request_id: Option<String>,
    pub is_read: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct CreateNotification {
    pub user_id: String,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub request_id: Option<String>,
}
