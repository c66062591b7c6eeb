use sqlx::SqlitePool;

use crate::db::{AidRequestRepository, Location, UserRepository};
use crate::error::{AppError, AppResult};
use crate::realtime::events::LocationUpdated;
use crate::realtime::{Broadcaster, Room, ServerEvent};

pub struct TrackingService;

impl TrackingService {
    /// Record a position reported for one delivery and share it with that
    /// delivery's room. Only the driver assigned to the request may report.
    pub async fn report_location(
        pool: &SqlitePool,
        broadcaster: &dyn Broadcaster,
        driver_id: &str,
        aid_request_id: &str,
        location: Location,
    ) -> AppResult<()> {
        if !location.is_valid() {
            return Err(AppError::Validation("Location is out of range".to_string()));
        }

        let request = AidRequestRepository::find_by_id(pool, aid_request_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Aid request not found".to_string()))?;
        if request.driver_id.as_deref() != Some(driver_id) {
            return Err(AppError::Forbidden(
                "Driver is not assigned to this aid request".to_string(),
            ));
        }

        if !UserRepository::update_location(pool, driver_id, location).await? {
            return Err(AppError::NotFound("Driver not found".to_string()));
        }

        let room = Room::AidRequest(request.id);
        Self::publish(broadcaster, &room, driver_id, location).await;
        Ok(())
    }

    /// Record a position sent outside any single delivery. It is shared with the
    /// rooms of every request the driver is currently carrying out and nowhere
    /// else. Returns the number of rooms addressed.
    pub async fn update_location(
        pool: &SqlitePool,
        broadcaster: &dyn Broadcaster,
        driver_id: &str,
        location: Location,
    ) -> AppResult<usize> {
        if !location.is_valid() {
            return Err(AppError::Validation("Location is out of range".to_string()));
        }
        if !UserRepository::update_location(pool, driver_id, location).await? {
            return Err(AppError::NotFound("Driver not found".to_string()));
        }

        let active = AidRequestRepository::list_active_for_driver(pool, driver_id).await?;
        for request in &active {
            let room = Room::AidRequest(request.id.clone());
            Self::publish(broadcaster, &room, driver_id, location).await;
        }
        Ok(active.len())
    }

    async fn publish(broadcaster: &dyn Broadcaster, room: &Room, driver_id: &str, location: Location) {
        let event = ServerEvent::LocationUpdated(LocationUpdated {
            driver_id: driver_id.to_string(),
            location,
        });
        if let Err(e) = broadcaster.emit(room, &event).await {
            tracing::error!("Failed to broadcast location of {} to {}: {}", driver_id, room, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{RegistrationStatus, Role};
    use crate::realtime::RoomHub;
    use crate::test_support::{seed_aid_request, seed_user, test_pool};

    const ADDIS: Location = Location { lat: 9.03, lng: 38.74 };

    #[tokio::test]
    async fn rest_update_reaches_only_active_request_rooms() {
        let pool = test_pool().await;
        let hub = RoomHub::new();
        let sender = seed_user(&pool, "s@ngo.org", Role::Sender, RegistrationStatus::Approved).await;
        let driver = seed_user(&pool, "d@trucks.et", Role::Driver, RegistrationStatus::Approved).await;

        let active = seed_aid_request(&pool, &sender.id).await;
        AidRequestRepository::accept(&pool, &active.id, &driver.id).await.unwrap();
        let open = seed_aid_request(&pool, &sender.id).await;

        let (watcher, mut watcher_rx) = hub.register(&sender.id);
        hub.join(watcher, Room::AidRequest(active.id.clone()));
        let (idle, mut idle_rx) = hub.register(&sender.id);
        hub.join(idle, Room::AidRequest(open.id.clone()));

        let rooms = TrackingService::update_location(&pool, &hub, &driver.id, ADDIS)
            .await
            .unwrap();
        assert_eq!(rooms, 1);
        assert!(watcher_rx.try_recv().unwrap().contains("locationUpdated"));
        assert!(idle_rx.try_recv().is_err());

        let stored = UserRepository::find_by_id(&pool, &driver.id).await.unwrap().unwrap();
        assert_eq!(stored.truck_details.unwrap().location, Some(ADDIS));
    }

    #[tokio::test]
    async fn unassigned_driver_cannot_report_into_a_room() {
        let pool = test_pool().await;
        let hub = RoomHub::new();
        let sender = seed_user(&pool, "s@ngo.org", Role::Sender, RegistrationStatus::Approved).await;
        let driver = seed_user(&pool, "d@trucks.et", Role::Driver, RegistrationStatus::Approved).await;
        let request = seed_aid_request(&pool, &sender.id).await;

        let err = TrackingService::report_location(&pool, &hub, &driver.id, &request.id, ADDIS)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let stored = UserRepository::find_by_id(&pool, &driver.id).await.unwrap().unwrap();
        assert_eq!(stored.truck_details.unwrap().location, None);
    }

    #[tokio::test]
    async fn out_of_range_location_is_rejected() {
        let pool = test_pool().await;
        let hub = RoomHub::new();
        let err = TrackingService::update_location(
            &pool,
            &hub,
            "anyone",
            Location { lat: 120.0, lng: 0.0 },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
