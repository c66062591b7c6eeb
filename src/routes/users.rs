use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::{Location, RegistrationStatus, Role, TruckStatus, UserRepository};
use crate::error::{AppError, AppResult};
use crate::routes::auth::{AdminUser, AuthUser, UserResponse};
use crate::services::approval::ApprovalService;
use crate::services::tracking::TrackingService;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_users))
        .route("/available", get(available_drivers))
        .route("/driver/status", put(update_driver_status))
        .route("/:id/approve", put(approve_user))
        .route("/:id/reject", put(reject_user))
        .route("/:id/location", put(update_location))
}

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DriverStatusRequest {
    pub status: TruckStatus,
}

#[derive(Debug, Deserialize)]
pub struct LocationRequest {
    pub location: Location,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationResponse {
    pub driver_id: String,
    pub location: Location,
    /// Aid request rooms the update was broadcast to
    pub rooms: usize,
}

/// All accounts, optionally filtered by registration status. Admin only.
async fn list_users(
    State(state): State<Arc<AppState>>,
    AdminUser(_admin): AdminUser,
    Query(query): Query<ListUsersQuery>,
) -> AppResult<Json<Vec<UserResponse>>> {
    let status = query
        .status
        .filter(|s| !s.trim().is_empty())
        .map(|s| RegistrationStatus::try_from(s.trim()).map_err(AppError::Validation))
        .transpose()?;

    let users = UserRepository::list(&state.db, status).await?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

async fn available_drivers(
    State(state): State<Arc<AppState>>,
    AuthUser(_user): AuthUser,
) -> AppResult<Json<Vec<UserResponse>>> {
    let drivers = UserRepository::list_available_drivers(&state.db).await?;
    Ok(Json(drivers.into_iter().map(UserResponse::from).collect()))
}

async fn update_driver_status(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(body): Json<DriverStatusRequest>,
) -> AppResult<Json<UserResponse>> {
    if user.role != Role::Driver {
        return Err(AppError::Forbidden("Only drivers have a truck status".to_string()));
    }
    UserRepository::update_truck_status(&state.db, &user.id, body.status).await?;

    let user = UserRepository::find_by_id(&state.db, &user.id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
    Ok(Json(user.into()))
}

async fn approve_user(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> AppResult<Json<UserResponse>> {
    let user = ApprovalService::approve(&state.db, state.broadcaster.as_ref(), &id).await?;
    tracing::info!("Administrator {} approved {}", admin.id, user.id);
    Ok(Json(user.into()))
}

async fn reject_user(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> AppResult<Json<UserResponse>> {
    let user = ApprovalService::reject(&state.db, state.broadcaster.as_ref(), &id).await?;
    tracing::info!("Administrator {} rejected {}", admin.id, user.id);
    Ok(Json(user.into()))
}

/// Record a driver position outside the socket channel. Allowed for the driver
/// itself and for administrators.
async fn update_location(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Json(body): Json<LocationRequest>,
) -> AppResult<Json<LocationResponse>> {
    if user.id != id && !user.is_admin() {
        return Err(AppError::Forbidden(
            "Drivers can only update their own location".to_string(),
        ));
    }

    let rooms =
        TrackingService::update_location(&state.db, state.broadcaster.as_ref(), &id, body.location)
            .await?;
    Ok(Json(LocationResponse {
        driver_id: id,
        location: body.location,
        rooms,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::Room;
    use crate::routes::testing::call;
    use crate::services::auth::AuthService;
    use crate::test_support::{seed_aid_request, seed_user, test_state};
    use crate::db::AidRequestRepository;
    use http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn admin_lists_pending_accounts() {
        let (state, _hub) = test_state().await;
        let app = crate::routes::router(state.clone(), crate::routes::auth::router());
        let admin = seed_user(&state.db, "root@es.et", Role::Admin, RegistrationStatus::Approved).await;
        let sender = seed_user(&state.db, "s@ngo.org", Role::Sender, RegistrationStatus::Approved).await;
        seed_user(&state.db, "p@ngo.org", Role::Sender, RegistrationStatus::Pending).await;

        let admin_token = AuthService::create_jwt(&state, &admin).unwrap();
        let (status, body) =
            call(&app, Method::GET, "/api/users?status=PENDING", Some(&admin_token), None).await;
        assert_eq!(status, StatusCode::OK);
        let list = body.as_array().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["email"], "p@ngo.org");

        let sender_token = AuthService::create_jwt(&state, &sender).unwrap();
        let (status, _) = call(&app, Method::GET, "/api/users", Some(&sender_token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) =
            call(&app, Method::GET, "/api/users?status=MAYBE", Some(&admin_token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn approve_twice_conflicts() {
        let (state, _hub) = test_state().await;
        let app = crate::routes::router(state.clone(), crate::routes::auth::router());
        let admin = seed_user(&state.db, "root@es.et", Role::Admin, RegistrationStatus::Approved).await;
        let driver = seed_user(&state.db, "d@trucks.et", Role::Driver, RegistrationStatus::Pending).await;
        let token = AuthService::create_jwt(&state, &admin).unwrap();

        let uri = format!("/api/users/{}/approve", driver.id);
        let (status, body) = call(&app, Method::PUT, &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "APPROVED");

        let (status, _) = call(&app, Method::PUT, &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) =
            call(&app, Method::PUT, "/api/users/missing/reject", Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn driver_status_and_availability() {
        let (state, _hub) = test_state().await;
        let app = crate::routes::router(state.clone(), crate::routes::auth::router());
        let driver = seed_user(&state.db, "d@trucks.et", Role::Driver, RegistrationStatus::Approved).await;
        let token = AuthService::create_jwt(&state, &driver).unwrap();

        let (_, body) = call(&app, Method::GET, "/api/users/available", Some(&token), None).await;
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (status, body) = call(
            &app,
            Method::PUT,
            "/api/users/driver/status",
            Some(&token),
            Some(json!({ "status": "OFFLINE" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["truckDetails"]["currentStatus"], "OFFLINE");

        let (_, body) = call(&app, Method::GET, "/api/users/available", Some(&token), None).await;
        assert!(body.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn location_endpoint_is_room_scoped() {
        let (state, hub) = test_state().await;
        let app = crate::routes::router(state.clone(), crate::routes::auth::router());
        let sender = seed_user(&state.db, "s@ngo.org", Role::Sender, RegistrationStatus::Approved).await;
        let driver = seed_user(&state.db, "d@trucks.et", Role::Driver, RegistrationStatus::Approved).await;
        let request = seed_aid_request(&state.db, &sender.id).await;
        AidRequestRepository::accept(&state.db, &request.id, &driver.id).await.unwrap();

        let (watcher, mut watcher_rx) = hub.register(&sender.id);
        hub.join(watcher, Room::AidRequest(request.id.clone()));
        let (bystander, mut bystander_rx) = hub.register(&sender.id);
        hub.join(bystander, Room::User(sender.id.clone()));

        let driver_token = AuthService::create_jwt(&state, &driver).unwrap();
        let (status, body) = call(
            &app,
            Method::PUT,
            &format!("/api/users/{}/location", driver.id),
            Some(&driver_token),
            Some(json!({ "location": { "lat": 11.6, "lng": 37.4 } })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rooms"], 1);
        assert!(watcher_rx.try_recv().unwrap().contains("locationUpdated"));
        assert!(bystander_rx.try_recv().is_err());

        let sender_token = AuthService::create_jwt(&state, &sender).unwrap();
        let (status, _) = call(
            &app,
            Method::PUT,
            &format!("/api/users/{}/location", driver.id),
            Some(&sender_token),
            Some(json!({ "location": { "lat": 0.0, "lng": 0.0 } })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
