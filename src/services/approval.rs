//! Administrator review of new registrations.
//!
//! An account starts PENDING and is reviewed exactly once: approval and
//! rejection are both terminal. Every successful review leaves one notification
//! for the reviewed account and pushes it to that account's live connections.

use sqlx::SqlitePool;

use crate::db::{CreateNotification, NotificationKind, RegistrationStatus, User, UserRepository};
use crate::error::{AppError, AppResult};
use crate::realtime::Broadcaster;
use crate::services::notifications::NotificationService;

pub struct ApprovalService;

impl ApprovalService {
    pub async fn approve(
        pool: &SqlitePool,
        broadcaster: &dyn Broadcaster,
        account_id: &str,
    ) -> AppResult<User> {
        Self::review(pool, broadcaster, account_id, RegistrationStatus::Approved).await
    }

    pub async fn reject(
        pool: &SqlitePool,
        broadcaster: &dyn Broadcaster,
        account_id: &str,
    ) -> AppResult<User> {
        Self::review(pool, broadcaster, account_id, RegistrationStatus::Rejected).await
    }

    async fn review(
        pool: &SqlitePool,
        broadcaster: &dyn Broadcaster,
        account_id: &str,
        decision: RegistrationStatus,
    ) -> AppResult<User> {
        let account = UserRepository::find_by_id(pool, account_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        if !account.status.can_transition_to(decision) {
            return Err(AppError::Conflict(format!(
                "Account has already been reviewed ({})",
                account.status.as_str()
            )));
        }

        // Conditional on the row still being PENDING; a concurrent review wins or loses as a whole.
        let account =
            UserRepository::transition_status(pool, account_id, account.status, decision)
                .await?
                .ok_or_else(|| {
                    AppError::Conflict("Account has already been reviewed".to_string())
                })?;

        tracing::info!("Account {} is now {}", account.id, decision.as_str());

        let notification = match decision {
            RegistrationStatus::Rejected => CreateNotification {
                user_id: account.id.clone(),
                title: "Account Rejected".to_string(),
                message: "Your account registration has been rejected by an administrator."
                    .to_string(),
                kind: NotificationKind::Error,
                request_id: None,
            },
            _ => CreateNotification {
                user_id: account.id.clone(),
                title: "Account Approved".to_string(),
                message: "Your account has been approved by an administrator.".to_string(),
                kind: NotificationKind::Success,
                request_id: None,
            },
        };
        NotificationService::notify(pool, broadcaster, notification).await?;

        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{NotificationRepository, Role};
    use crate::realtime::{Room, RoomHub};
    use crate::test_support::{seed_user, test_pool};

    #[tokio::test]
    async fn approval_notifies_and_pushes_once() {
        let pool = test_pool().await;
        let hub = RoomHub::new();
        let driver = seed_user(&pool, "d@trucks.et", Role::Driver, RegistrationStatus::Pending).await;
        let (conn, mut rx) = hub.register(&driver.id);
        hub.join(conn, Room::User(driver.id.clone()));

        let approved = ApprovalService::approve(&pool, &hub, &driver.id).await.unwrap();
        assert_eq!(approved.status, RegistrationStatus::Approved);

        let stored = NotificationRepository::find_by_user_id(&pool, &driver.id, false, 10, 0)
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].title, "Account Approved");
        assert_eq!(stored[0].kind, NotificationKind::Success);

        let frame: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["event"], "newNotification");
        assert_eq!(frame["data"]["id"], stored[0].id.as_str());
        assert_eq!(frame["data"]["message"], stored[0].message.as_str());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn rejection_is_terminal() {
        let pool = test_pool().await;
        let hub = RoomHub::new();
        let sender = seed_user(&pool, "s@ngo.org", Role::Sender, RegistrationStatus::Pending).await;

        let rejected = ApprovalService::reject(&pool, &hub, &sender.id).await.unwrap();
        assert_eq!(rejected.status, RegistrationStatus::Rejected);

        let again = ApprovalService::approve(&pool, &hub, &sender.id).await.unwrap_err();
        assert!(matches!(again, AppError::Conflict(_)));
        assert_eq!(
            NotificationRepository::count_by_user_id(&pool, &sender.id, false)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn unknown_account_is_not_found() {
        let pool = test_pool().await;
        let hub = RoomHub::new();
        let err = ApprovalService::approve(&pool, &hub, "missing").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
