use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, patch},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::{Notification, NotificationRepository};
use crate::error::{AppError, AppResult};
use crate::routes::auth::AuthUser;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    // Both routes name the segment `:id` so the router sees one parameter.
    // For the listing it is the owner's user id, for `/read` the notification id.
    Router::new()
        .route("/:id", get(list_notifications))
        .route("/:id/read", patch(mark_read))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListNotificationsQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub unread_only: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct NotificationsListResponse {
    pub items: Vec<Notification>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

// ============================================================================
// Handlers
// ============================================================================

/// Notifications of one account, newest first. Owner or administrator only.
async fn list_notifications(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(user_id): Path<String>,
    Query(query): Query<ListNotificationsQuery>,
) -> AppResult<Json<NotificationsListResponse>> {
    if user.id != user_id && !user.is_admin() {
        return Err(AppError::Forbidden(
            "Cannot read another account's notifications".to_string(),
        ));
    }

    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(20).clamp(1, 100);
    let offset = (page - 1)
        .checked_mul(per_page)
        .ok_or_else(|| AppError::Validation(format!("Page {} is out of range", page)))?;
    let unread_only = query.unread_only.unwrap_or(false);

    let items =
        NotificationRepository::find_by_user_id(&state.db, &user_id, unread_only, per_page, offset)
            .await?;
    let total = NotificationRepository::count_by_user_id(&state.db, &user_id, unread_only).await?;
    let total_pages = (total + per_page - 1) / per_page;

    Ok(Json(NotificationsListResponse {
        items,
        total,
        page,
        per_page,
        total_pages,
    }))
}

/// Mark a notification read. Repeating the call is harmless.
async fn mark_read(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<Notification>> {
    let notification = NotificationRepository::find_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound("Notification not found".to_string()))?;
    if notification.user_id != user.id {
        return Err(AppError::Forbidden(
            "Cannot modify another account's notification".to_string(),
        ));
    }

    let notification = NotificationRepository::mark_read(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound("Notification not found".to_string()))?;
    Ok(Json(notification))
}
