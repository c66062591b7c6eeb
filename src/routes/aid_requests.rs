use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::db::{AidRequest, AidRequestStatus};
use crate::error::AppResult;
use crate::routes::auth::AuthUser;
use crate::services::aid_requests::{AidRequestService, NewAidRequest};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_aid_requests).post(create_aid_request))
        .route("/:id", get(get_aid_request).put(update_aid_request))
        .route("/:id/complete", post(complete_aid_request))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AidRequestResponse {
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

impl From<AidRequest> for AidRequestResponse {
    fn from(r: AidRequest) -> Self {
        Self {
            id: r.id,
            sender_id: r.sender_id,
            driver_id: r.driver_id,
            aid_type: r.aid_type,
            description: r.description,
            quantity: r.quantity,
            destination: r.destination,
            status: r.status,
            created_at: r.created_at,
            updated_at: r.updated_at,
            completed_at: r.completed_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: AidRequestStatus,
}

async fn list_aid_requests(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> AppResult<Json<Vec<AidRequestResponse>>> {
    let requests = AidRequestService::list_for(&state.db, &user).await?;
    Ok(Json(requests.into_iter().map(AidRequestResponse::from).collect()))
}

async fn create_aid_request(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(body): Json<NewAidRequest>,
) -> AppResult<impl IntoResponse> {
    let request =
        AidRequestService::create(&state.db, state.broadcaster.as_ref(), &user, body).await?;
    Ok((StatusCode::CREATED, Json(AidRequestResponse::from(request))))
}

async fn get_aid_request(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<AidRequestResponse>> {
    let request = AidRequestService::find_visible(&state.db, &user, &id).await?;
    Ok(Json(request.into()))
}

async fn update_aid_request(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Json(body): Json<UpdateStatusRequest>,
) -> AppResult<Json<AidRequestResponse>> {
    let request = AidRequestService::update_status(
        &state.db,
        state.broadcaster.as_ref(),
        &user,
        &id,
        body.status,
    )
    .await?;
    Ok(Json(request.into()))
}

async fn complete_aid_request(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<AidRequestResponse>> {
    let request =
        AidRequestService::complete(&state.db, state.broadcaster.as_ref(), &user, &id).await?;
    Ok(Json(request.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{RegistrationStatus, Role};
    use crate::routes::testing::call;
    use crate::services::auth::AuthService;
    use crate::test_support::{seed_aid_request, seed_user, test_state};
    use http::Method;
    use serde_json::json;

    #[tokio::test]
    async fn listing_is_scoped_by_role() {
        let (state, _hub) = test_state().await;
        let app = crate::routes::router(state.clone(), crate::routes::auth::router());
        let mine = seed_user(&state.db, "a@ngo.org", Role::Sender, RegistrationStatus::Approved).await;
        let theirs = seed_user(&state.db, "b@ngo.org", Role::Sender, RegistrationStatus::Approved).await;
        let driver = seed_user(&state.db, "d@trucks.et", Role::Driver, RegistrationStatus::Approved).await;
        let admin = seed_user(&state.db, "root@es.et", Role::Admin, RegistrationStatus::Approved).await;
        seed_aid_request(&state.db, &mine.id).await;
        let other = seed_aid_request(&state.db, &theirs.id).await;

        let token = AuthService::create_jwt(&state, &mine).unwrap();
        let (_, body) = call(&app, Method::GET, "/api/aid-requests", Some(&token), None).await;
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (status, _) = call(
            &app,
            Method::GET,
            &format!("/api/aid-requests/{}", other.id),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let token = AuthService::create_jwt(&state, &driver).unwrap();
        let (_, body) = call(&app, Method::GET, "/api/aid-requests", Some(&token), None).await;
        assert_eq!(body.as_array().unwrap().len(), 2);

        let token = AuthService::create_jwt(&state, &admin).unwrap();
        let (_, body) = call(&app, Method::GET, "/api/aid-requests", Some(&token), None).await;
        assert_eq!(body.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn driver_moves_request_through_its_lifecycle() {
        let (state, _hub) = test_state().await;
        let app = crate::routes::router(state.clone(), crate::routes::auth::router());
        let sender = seed_user(&state.db, "s@ngo.org", Role::Sender, RegistrationStatus::Approved).await;
        let driver = seed_user(&state.db, "d@trucks.et", Role::Driver, RegistrationStatus::Approved).await;
        let request = seed_aid_request(&state.db, &sender.id).await;
        let token = AuthService::create_jwt(&state, &driver).unwrap();
        let uri = format!("/api/aid-requests/{}", request.id);

        let (status, body) = call(
            &app,
            Method::PUT,
            &uri,
            Some(&token),
            Some(json!({ "status": "ACCEPTED" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["driverId"], driver.id.as_str());

        let (status, body) = call(
            &app,
            Method::PUT,
            &uri,
            Some(&token),
            Some(json!({ "status": "IN_TRANSIT" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "IN_TRANSIT");

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("{}/complete", uri),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "COMPLETED");
        assert!(!body["completedAt"].is_null());

        let sender_token = AuthService::create_jwt(&state, &sender).unwrap();
        let (status, _) = call(
            &app,
            Method::PUT,
            &uri,
            Some(&sender_token),
            Some(json!({ "status": "ACCEPTED" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
