use sqlx::SqlitePool;

use crate::db::{AidRequest, CreateNotification, Notification, NotificationKind, NotificationRepository};
use crate::error::AppResult;
use crate::realtime::{Broadcaster, Room, ServerEvent};

pub const AID_REQUEST_CREATED_TITLE: &str = "Aid Request Created";

pub struct NotificationService;

impl NotificationService {
    /// Persist a notification and push it to every live connection of its owner.
    ///
    /// The stored row is the source of truth: a failed push is logged and the
    /// notification stays retrievable over REST.
    pub async fn notify(
        pool: &SqlitePool,
        broadcaster: &dyn Broadcaster,
        notification: CreateNotification,
    ) -> AppResult<Notification> {
        let notification = NotificationRepository::create(pool, notification).await?;

        let room = Room::User(notification.user_id.clone());
        let event = ServerEvent::NewNotification(notification.clone());
        if let Err(e) = broadcaster.emit(&room, &event).await {
            tracing::error!(
                "Failed to push notification {} to {}: {}",
                notification.id,
                room,
                e
            );
        }

        Ok(notification)
    }

    /// Tell a sender their request was recorded. Returns `None` when the sender
    /// already holds this notification, so REST and socket callers can both
    /// trigger it.
    pub async fn notify_aid_request_created(
        pool: &SqlitePool,
        broadcaster: &dyn Broadcaster,
        request: &AidRequest,
    ) -> AppResult<Option<Notification>> {
        if NotificationRepository::exists_for_request(
            pool,
            &request.sender_id,
            &request.id,
            AID_REQUEST_CREATED_TITLE,
        )
        .await?
        {
            tracing::debug!("Creation of aid request {} already announced", request.id);
            return Ok(None);
        }

        let notification = Self::notify(
            pool,
            broadcaster,
            CreateNotification {
                user_id: request.sender_id.clone(),
                title: AID_REQUEST_CREATED_TITLE.to_string(),
                message: format!(
                    "Your aid request for {} has been created.",
                    request.aid_type
                ),
                kind: NotificationKind::Success,
                request_id: Some(request.id.clone()),
            },
        )
        .await?;

        Ok(Some(notification))
    }
}
