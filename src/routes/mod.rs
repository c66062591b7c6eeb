use std::sync::Arc;

use axum::{routing::get, Router};

use crate::AppState;

pub mod aid_requests;
pub mod auth;
pub mod health;
pub mod notifications;
pub mod socket;
pub mod users;

/// Assemble the API. `auth_routes` is passed in so the caller decides which
/// layers (rate limiting) wrap the public authentication endpoints.
pub fn router(state: Arc<AppState>, auth_routes: Router<Arc<AppState>>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api/auth", auth_routes)
        .nest("/api/users", users::router())
        .nest("/api/aid-requests", aid_requests::router())
        .nest("/api/notifications", notifications::router())
        .route("/socket", get(socket::upgrade))
        .with_state(state)
}
