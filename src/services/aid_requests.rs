use serde::Deserialize;
use sqlx::SqlitePool;

use crate::db::{
    AidRequest, AidRequestRepository, AidRequestStatus, CreateAidRequest, CreateNotification,
    NotificationKind, Role, TruckStatus, User, UserRepository,
};
use crate::error::{AppError, AppResult};
use crate::realtime::events::AidRequestStatusChanged;
use crate::realtime::{Broadcaster, Room, ServerEvent};
use crate::services::notifications::NotificationService;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAidRequest {
    #[serde(default)]
    pub aid_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub quantity: String,
    #[serde(default)]
    pub destination: String,
}

pub struct AidRequestService;

impl AidRequestService {
    /// Record a new request for `sender` and announce it to the sender.
    pub async fn create(
        pool: &SqlitePool,
        broadcaster: &dyn Broadcaster,
        sender: &User,
        input: NewAidRequest,
    ) -> AppResult<AidRequest> {
        if sender.role != Role::Sender {
            return Err(AppError::Forbidden(
                "Only sender organizations can create aid requests".to_string(),
            ));
        }

        let aid_type = required("aidType", &input.aid_type)?;
        let quantity = required("quantity", &input.quantity)?;
        let destination = required("destination", &input.destination)?;

        let request = AidRequestRepository::create(
            pool,
            CreateAidRequest {
                sender_id: sender.id.clone(),
                aid_type,
                description: input.description.trim().to_string(),
                quantity,
                destination,
            },
        )
        .await?;
        tracing::info!("Aid request {} created by {}", request.id, sender.id);

        NotificationService::notify_aid_request_created(pool, broadcaster, &request).await?;
        Ok(request)
    }

    /// Requests visible to `user`: everything for administrators, their own for
    /// senders, open and assigned ones for drivers.
    pub async fn list_for(pool: &SqlitePool, user: &User) -> AppResult<Vec<AidRequest>> {
        match user.role {
            Role::Admin => AidRequestRepository::list_all(pool).await,
            Role::Sender => AidRequestRepository::list_by_sender(pool, &user.id).await,
            Role::Driver => AidRequestRepository::list_for_driver(pool, &user.id).await,
        }
    }

    pub async fn find_visible(pool: &SqlitePool, user: &User, id: &str) -> AppResult<AidRequest> {
        let request = AidRequestRepository::find_by_id(pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound("Aid request not found".to_string()))?;

        let visible = match user.role {
            Role::Admin => true,
            Role::Sender => request.sender_id == user.id,
            Role::Driver => request.is_party(&user.id) || request.status == AidRequestStatus::Pending,
        };
        if !visible {
            return Err(AppError::Forbidden("Not a party to this aid request".to_string()));
        }
        Ok(request)
    }

    /// Driver-initiated status change: ACCEPTED claims an open request,
    /// IN_TRANSIT marks an accepted one as on the road.
    pub async fn update_status(
        pool: &SqlitePool,
        broadcaster: &dyn Broadcaster,
        driver: &User,
        id: &str,
        status: AidRequestStatus,
    ) -> AppResult<AidRequest> {
        if driver.role != Role::Driver {
            return Err(AppError::Forbidden("Only drivers can update aid requests".to_string()));
        }

        let updated = match status {
            AidRequestStatus::Accepted => {
                let accepted = AidRequestRepository::accept(pool, id, &driver.id).await?;
                if accepted.is_some() {
                    UserRepository::update_truck_status(pool, &driver.id, TruckStatus::OnTrip)
                        .await?;
                }
                accepted
            }
            AidRequestStatus::InTransit => {
                AidRequestRepository::advance(
                    pool,
                    id,
                    &driver.id,
                    AidRequestStatus::Accepted,
                    AidRequestStatus::InTransit,
                )
                .await?
            }
            _ => {
                return Err(AppError::Validation(
                    "Status must be ACCEPTED or IN_TRANSIT".to_string(),
                ))
            }
        };

        let request = match updated {
            Some(request) => request,
            None => return Err(Self::transition_failure(pool, id, &driver.id).await),
        };

        Self::announce(pool, broadcaster, &request).await?;
        Ok(request)
    }

    /// Mark a delivery finished and free the driver's truck.
    pub async fn complete(
        pool: &SqlitePool,
        broadcaster: &dyn Broadcaster,
        driver: &User,
        id: &str,
    ) -> AppResult<AidRequest> {
        let current = AidRequestRepository::find_by_id(pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound("Aid request not found".to_string()))?;
        if current.driver_id.as_deref() != Some(driver.id.as_str()) {
            return Err(AppError::Forbidden(
                "Only the assigned driver can complete this aid request".to_string(),
            ));
        }
        if !current.status.is_active() {
            return Err(AppError::Conflict(format!(
                "Aid request is {} and cannot be completed",
                current.status.as_str()
            )));
        }

        let request = AidRequestRepository::advance(
            pool,
            id,
            &driver.id,
            current.status,
            AidRequestStatus::Completed,
        )
        .await?
        .ok_or_else(|| AppError::Conflict("Aid request changed concurrently".to_string()))?;

        UserRepository::update_truck_status(pool, &driver.id, TruckStatus::Available).await?;
        Self::announce(pool, broadcaster, &request).await?;
        Ok(request)
    }

    /// Tell the request room about the new status and notify the sender.
    async fn announce(
        pool: &SqlitePool,
        broadcaster: &dyn Broadcaster,
        request: &AidRequest,
    ) -> AppResult<()> {
        tracing::info!("Aid request {} is now {}", request.id, request.status.as_str());

        let room = Room::AidRequest(request.id.clone());
        let event = ServerEvent::AidRequestStatusChanged(AidRequestStatusChanged {
            aid_request_id: request.id.clone(),
            status: request.status,
            driver_id: request.driver_id.clone(),
        });
        if let Err(e) = broadcaster.emit(&room, &event).await {
            tracing::error!("Failed to broadcast status of {}: {}", request.id, e);
        }

        let (title, message, kind) = match request.status {
            AidRequestStatus::Accepted => (
                "Aid Request Accepted",
                format!("A driver has accepted your aid request for {}.", request.aid_type),
                NotificationKind::Info,
            ),
            AidRequestStatus::InTransit => (
                "Aid Request In Transit",
                format!("Your aid request for {} is on its way.", request.aid_type),
                NotificationKind::Info,
            ),
            AidRequestStatus::Completed => (
                "Aid Request Completed",
                format!(
                    "Your aid request for {} has been delivered to {}.",
                    request.aid_type, request.destination
                ),
                NotificationKind::Success,
            ),
            AidRequestStatus::Pending => return Ok(()),
        };

        NotificationService::notify(
            pool,
            broadcaster,
            CreateNotification {
                user_id: request.sender_id.clone(),
                title: title.to_string(),
                message,
                kind,
                request_id: Some(request.id.clone()),
            },
        )
        .await?;
        Ok(())
    }

    /// Explain why a conditional update matched no row.
    async fn transition_failure(pool: &SqlitePool, id: &str, driver_id: &str) -> AppError {
        match AidRequestRepository::find_by_id(pool, id).await {
            Ok(None) => AppError::NotFound("Aid request not found".to_string()),
            Ok(Some(request)) => match request.driver_id.as_deref() {
                Some(assigned) if assigned != driver_id => {
                    AppError::Conflict("Aid request is assigned to another driver".to_string())
                }
                _ => AppError::Conflict(format!(
                    "Aid request is {} and cannot move to the requested status",
                    request.status.as_str()
                )),
            },
            Err(e) => e,
        }
    }
}

fn required(field: &str, value: &str) -> AppResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::Validation(format!("{} is required", field)));
    }
    Ok(value.to_string())
}
