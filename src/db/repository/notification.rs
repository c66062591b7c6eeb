use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db::models::*;
use crate::error::{AppError, AppResult};

// ============================================================================
// Notification Repository
// ============================================================================

pub struct NotificationRepository;

impl NotificationRepository {
    pub async fn create(pool: &SqlitePool, n: CreateNotification) -> AppResult<Notification> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        let row = sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, title, message, kind, request_id, is_read, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 0, ?)
            RETURNING id, user_id, title, message, kind, request_id, is_read, created_at
            "#,
        )
        .bind(&id)
        .bind(&n.user_id)
        .bind(&n.title)
        .bind(&n.message)
        .bind(n.kind.as_str())
        .bind(&n.request_id)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        map_notification(&row)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Notification>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, title, message, kind, request_id, is_read, created_at
            FROM notifications
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        row.as_ref().map(map_notification).transpose()
    }

    /// Notifications for a user, newest first, with pagination.
    pub async fn find_by_user_id(
        pool: &SqlitePool,
        user_id: &str,
        unread_only: bool,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<Notification>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, title, message, kind, request_id, is_read, created_at
            FROM notifications
            WHERE user_id = ? AND (? = 0 OR is_read = 0)
            ORDER BY created_at DESC
            LIMIT ?
            OFFSET ?
            "#,
        )
        .bind(user_id)
        .bind(unread_only)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        rows.iter().map(map_notification).collect()
    }

    pub async fn count_by_user_id(
        pool: &SqlitePool,
        user_id: &str,
        unread_only: bool,
    ) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ? AND (? = 0 OR is_read = 0)",
        )
        .bind(user_id)
        .bind(unread_only)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(count)
    }

    /// Whether `user_id` already holds a notification with this title for `request_id`.
    pub async fn exists_for_request(
        pool: &SqlitePool,
        user_id: &str,
        request_id: &str,
        title: &str,
    ) -> AppResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ? AND request_id = ? AND title = ?",
        )
        .bind(user_id)
        .bind(request_id)
        .bind(title)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(count > 0)
    }

    /// Set the read flag. Marking an already-read notification is a no-op.
    pub async fn mark_read(pool: &SqlitePool, id: &str) -> AppResult<Option<Notification>> {
        let row = sqlx::query(
            r#"
            UPDATE notifications
            SET is_read = 1
            WHERE id = ?
            RETURNING id, user_id, title, message, kind, request_id, is_read, created_at
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        row.as_ref().map(map_notification).transpose()
    }
}

fn map_notification(r: &SqliteRow) -> AppResult<Notification> {
    let kind: String = r.get("kind");
    let kind = NotificationKind::from_str(&kind).ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!("Unknown notification kind: {}", kind))
    })?;

    Ok(Notification {
        id: r.get("id"),
        user_id: r.get("user_id"),
        title: r.get("title"),
        message: r.get("message"),
        kind,
        request_id: r.get("request_id"),
        is_read: r.get("is_read"),
        created_at: r.get("created_at"),
    })
}
