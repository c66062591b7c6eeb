use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Account role. Fixed at registration and never updated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    Driver,
    Sender,
}

impl Role {
    /// Convert from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "ADMIN" => Some(Role::Admin),
            "DRIVER" => Some(Role::Driver),
            "SENDER" => Some(Role::Sender),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Driver => "DRIVER",
            Role::Sender => "SENDER",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Role {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::from_str(value).ok_or_else(|| format!("Invalid role: {}", value))
    }
}

/// Registration status driven by the admin approval workflow.
///
/// The only transitions are `Pending -> Approved` and `Pending -> Rejected`;
/// both outcomes are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RegistrationStatus {
    Pending,
    Approved,
    Rejected,
}

impl RegistrationStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Some(RegistrationStatus::Pending),
            "APPROVED" => Some(RegistrationStatus::Approved),
            "REJECTED" => Some(RegistrationStatus::Rejected),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RegistrationStatus::Pending => "PENDING",
            RegistrationStatus::Approved => "APPROVED",
            RegistrationStatus::Rejected => "REJECTED",
        }
    }

    /// Whether an administrator may move an account from `self` to `next`.
    pub fn can_transition_to(self, next: RegistrationStatus) -> bool {
        matches!(
            (self, next),
            (RegistrationStatus::Pending, RegistrationStatus::Approved)
                | (RegistrationStatus::Pending, RegistrationStatus::Rejected)
        )
    }
}

impl TryFrom<&str> for RegistrationStatus {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::from_str(value).ok_or_else(|| format!("Invalid registration status: {}", value))
    }
}

/// Operational state of a driver's truck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TruckStatus {
    Available,
    OnTrip,
    Offline,
}

impl TruckStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "AVAILABLE" => Some(TruckStatus::Available),
            "ON_TRIP" => Some(TruckStatus::OnTrip),
            "OFFLINE" => Some(TruckStatus::Offline),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TruckStatus::Available => "AVAILABLE",
            TruckStatus::OnTrip => "ON_TRIP",
            TruckStatus::Offline => "OFFLINE",
        }
    }
}

/// A WGS84 coordinate pair as sent by driver devices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
}

impl Location {
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TruckDetails {
    #[serde(default)]
    pub license_plate: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub capacity: String,
    #[serde(default)]
    pub driver_license: String,
    #[serde(default)]
    pub experience_years: String,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub current_status: Option<TruckStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationDetails {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub org_type: String,
    #[serde(default)]
    pub reg_number: String,
    #[serde(default)]
    pub sector: String,
    #[serde(default)]
    pub headquarters: String,
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub status: RegistrationStatus,

    // Only populated for DRIVER accounts
    pub truck_details: Option<TruckDetails>,
    // Only populated for SENDER accounts
    pub organization_details: Option<OrganizationDetails>,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone)]
pub struct CreateUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub status: RegistrationStatus,
    pub truck_details: Option<TruckDetails>,
    pub organization_details: Option<OrganizationDetails>,
}
