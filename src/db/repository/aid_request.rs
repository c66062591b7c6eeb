use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db::models::*;
use crate::error::{AppError, AppResult};

// ============================================================================
// Aid Request Repository
// ============================================================================

const AID_REQUEST_COLUMNS: &str = r#"
    id, sender_id, driver_id, aid_type, description, quantity, destination,
    status, created_at, updated_at, completed_at
"#;

pub struct AidRequestRepository;

impl AidRequestRepository {
    pub async fn create(pool: &SqlitePool, req: CreateAidRequest) -> AppResult<AidRequest> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO aid_requests (
                id, sender_id, driver_id, aid_type, description, quantity, destination,
                status, created_at, updated_at, completed_at
            )
            VALUES (?, ?, NULL, ?, ?, ?, ?, 'PENDING', ?, ?, NULL)
            RETURNING {}
            "#,
            AID_REQUEST_COLUMNS
        ))
        .bind(&id)
        .bind(&req.sender_id)
        .bind(&req.aid_type)
        .bind(&req.description)
        .bind(&req.quantity)
        .bind(&req.destination)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        map_aid_request(&row)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<AidRequest>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM aid_requests WHERE id = ?",
            AID_REQUEST_COLUMNS
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        row.as_ref().map(map_aid_request).transpose()
    }

    pub async fn list_all(pool: &SqlitePool) -> AppResult<Vec<AidRequest>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM aid_requests ORDER BY created_at DESC",
            AID_REQUEST_COLUMNS
        ))
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        rows.iter().map(map_aid_request).collect()
    }

    pub async fn list_by_sender(pool: &SqlitePool, sender_id: &str) -> AppResult<Vec<AidRequest>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM aid_requests WHERE sender_id = ? ORDER BY created_at DESC",
            AID_REQUEST_COLUMNS
        ))
        .bind(sender_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        rows.iter().map(map_aid_request).collect()
    }

    /// Requests a driver can see: open ones nobody took yet plus their own.
    pub async fn list_for_driver(pool: &SqlitePool, driver_id: &str) -> AppResult<Vec<AidRequest>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM aid_requests
            WHERE (status = 'PENDING' AND driver_id IS NULL) OR driver_id = ?
            ORDER BY created_at DESC
            "#,
            AID_REQUEST_COLUMNS
        ))
        .bind(driver_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        rows.iter().map(map_aid_request).collect()
    }

    /// Requests currently being carried out by `driver_id` (ACCEPTED or IN_TRANSIT).
    pub async fn list_active_for_driver(
        pool: &SqlitePool,
        driver_id: &str,
    ) -> AppResult<Vec<AidRequest>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM aid_requests
            WHERE driver_id = ? AND status IN ('ACCEPTED', 'IN_TRANSIT')
            ORDER BY created_at DESC
            "#,
            AID_REQUEST_COLUMNS
        ))
        .bind(driver_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        rows.iter().map(map_aid_request).collect()
    }

    /// Assign an open request to a driver. `None` when someone else got there first
    /// or the request is no longer PENDING.
    pub async fn accept(
        pool: &SqlitePool,
        id: &str,
        driver_id: &str,
    ) -> AppResult<Option<AidRequest>> {
        let now = Utc::now().naive_utc();
        let row = sqlx::query(&format!(
            r#"
            UPDATE aid_requests
            SET status = 'ACCEPTED', driver_id = ?, updated_at = ?
            WHERE id = ? AND status = 'PENDING' AND driver_id IS NULL
            RETURNING {}
            "#,
            AID_REQUEST_COLUMNS
        ))
        .bind(driver_id)
        .bind(now)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        row.as_ref().map(map_aid_request).transpose()
    }

    /// Advance a request owned by `driver_id` from `from` to `to`.
    pub async fn advance(
        pool: &SqlitePool,
        id: &str,
        driver_id: &str,
        from: AidRequestStatus,
        to: AidRequestStatus,
    ) -> AppResult<Option<AidRequest>> {
        let now = Utc::now().naive_utc();
        let completed_at = (to == AidRequestStatus::Completed).then_some(now);
        let row = sqlx::query(&format!(
            r#"
            UPDATE aid_requests
            SET status = ?, updated_at = ?, completed_at = COALESCE(?, completed_at)
            WHERE id = ? AND driver_id = ? AND status = ?
            RETURNING {}
            "#,
            AID_REQUEST_COLUMNS
        ))
        .bind(to.as_str())
        .bind(now)
        .bind(completed_at)
        .bind(id)
        .bind(driver_id)
        .bind(from.as_str())
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        row.as_ref().map(map_aid_request).transpose()
    }
}

fn map_aid_request(r: &SqliteRow) -> AppResult<AidRequest> {
    let status: String = r.get("status");
    let status = AidRequestStatus::from_str(&status).ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!("Unknown aid request status: {}", status))
    })?;

    Ok(AidRequest {
        id: r.get("id"),
        sender_id: r.get("sender_id"),
        driver_id: r.get("driver_id"),
        aid_type: r.get("aid_type"),
        description: r.get("description"),
        quantity: r.get("quantity"),
        destination: r.get("destination"),
        status,
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
        completed_at: r.get("completed_at"),
    })
}
