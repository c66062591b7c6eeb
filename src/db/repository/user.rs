use chrono::Utc;

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::*;
use crate::error::{AppError, AppResult};

// ============================================================================
// User Repository
// ============================================================================

const USER_COLUMNS: &str = r#"
    id, name, email, password_hash, role, status,
    truck_license_plate, truck_model, truck_capacity, truck_driver_license,
    truck_experience_years, truck_location_lat, truck_location_lng, truck_current_status,
    org_name, org_type, org_reg_number, org_sector, org_headquarters,
    created_at, updated_at
"#;

pub struct UserRepository;

impl UserRepository {
    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<User>> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)?;

        row.as_ref().map(map_user).transpose()
    }

    /// Lookup by e-mail. Callers pass the normalized (trimmed, lower-cased) address.
    pub async fn find_by_email(pool: &SqlitePool, email: &str) -> AppResult<Option<User>> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE email = ?", USER_COLUMNS))
            .bind(email)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)?;

        row.as_ref().map(map_user).transpose()
    }

    /// List accounts, newest first, optionally filtered by registration status.
    pub async fn list(
        pool: &SqlitePool,
        status: Option<RegistrationStatus>,
    ) -> AppResult<Vec<User>> {
        let status = status.map(RegistrationStatus::as_str);
        let rows = sqlx::query(&format!(
            "SELECT {} FROM users WHERE (? IS NULL OR status = ?) ORDER BY created_at DESC",
            USER_COLUMNS
        ))
        .bind(status)
        .bind(status)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        rows.iter().map(map_user).collect()
    }

    /// Approved drivers whose truck is currently available for dispatch.
    pub async fn list_available_drivers(pool: &SqlitePool) -> AppResult<Vec<User>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM users
            WHERE role = 'DRIVER' AND status = 'APPROVED' AND truck_current_status = 'AVAILABLE'
            ORDER BY name ASC
            "#,
            USER_COLUMNS
        ))
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        rows.iter().map(map_user).collect()
    }

    pub async fn create(pool: &SqlitePool, user: CreateUser) -> AppResult<User> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();
        let truck = user.truck_details.unwrap_or_default();
        let org = user.organization_details.unwrap_or_default();
        let is_driver = user.role == Role::Driver;
        let is_sender = user.role == Role::Sender;

        // Truck columns stay NULL for non-drivers, organization columns for non-senders.
        let truck_text = |v: &String| is_driver.then(|| v.clone());
        let org_text = |v: &String| is_sender.then(|| v.clone());
        let location = truck.location.filter(|_| is_driver);
        let truck_status = is_driver.then(|| {
            truck
                .current_status
                .unwrap_or(TruckStatus::Available)
                .as_str()
        });

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO users (
                id, name, email, password_hash, role, status,
                truck_license_plate, truck_model, truck_capacity, truck_driver_license,
                truck_experience_years, truck_location_lat, truck_location_lng, truck_current_status,
                org_name, org_type, org_reg_number, org_sector, org_headquarters,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(&id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.status.as_str())
        .bind(truck_text(&truck.license_plate))
        .bind(truck_text(&truck.model))
        .bind(truck_text(&truck.capacity))
        .bind(truck_text(&truck.driver_license))
        .bind(truck_text(&truck.experience_years))
        .bind(location.map(|l| l.lat))
        .bind(location.map(|l| l.lng))
        .bind(truck_status)
        .bind(org_text(&org.name))
        .bind(org_text(&org.org_type))
        .bind(org_text(&org.reg_number))
        .bind(org_text(&org.sector))
        .bind(org_text(&org.headquarters))
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                AppError::BadRequest("User already exists".to_string())
            }
            other => AppError::Database(other),
        })?;

        map_user(&row)
    }

    /// Move an account out of `from` into `to`.
    ///
    /// The update is conditional on the stored status still being `from`, so two
    /// administrators reviewing the same account cannot both succeed. Returns the
    /// updated account, or `None` when the account was not in `from`.
    pub async fn transition_status(
        pool: &SqlitePool,
        id: &str,
        from: RegistrationStatus,
        to: RegistrationStatus,
    ) -> AppResult<Option<User>> {
        let now = Utc::now().naive_utc();
        let row = sqlx::query(&format!(
            r#"
            UPDATE users
            SET status = ?, updated_at = ?
            WHERE id = ? AND status = ?
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(to.as_str())
        .bind(now)
        .bind(id)
        .bind(from.as_str())
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        row.as_ref().map(map_user).transpose()
    }

    /// Persist a driver's last known location. Returns false if no driver has that id.
    pub async fn update_location(
        pool: &SqlitePool,
        driver_id: &str,
        location: Location,
    ) -> AppResult<bool> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            r#"
            UPDATE users
            SET truck_location_lat = ?, truck_location_lng = ?, updated_at = ?
            WHERE id = ? AND role = 'DRIVER'
            "#,
        )
        .bind(location.lat)
        .bind(location.lng)
        .bind(now)
        .bind(driver_id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn update_truck_status(
        pool: &SqlitePool,
        driver_id: &str,
        status: TruckStatus,
    ) -> AppResult<bool> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            r#"
            UPDATE users
            SET truck_current_status = ?, updated_at = ?
            WHERE id = ? AND role = 'DRIVER'
            "#,
        )
        .bind(status.as_str())
        .bind(now)
        .bind(driver_id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }
}

fn map_user(r: &SqliteRow) -> AppResult<User> {
    let role: String = r.get("role");
    let status: String = r.get("status");
    let role = Role::from_str(&role)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Unknown role in database: {}", role)))?;
    let status = RegistrationStatus::from_str(&status).ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!("Unknown status in database: {}", status))
    })?;

    let truck_details = if role == Role::Driver {
        let lat: Option<f64> = r.get("truck_location_lat");
        let lng: Option<f64> = r.get("truck_location_lng");
        let current_status: Option<String> = r.get("truck_current_status");
        Some(TruckDetails {
            license_plate: r.get::<Option<String>, _>("truck_license_plate").unwrap_or_default(),
            model: r.get::<Option<String>, _>("truck_model").unwrap_or_default(),
            capacity: r.get::<Option<String>, _>("truck_capacity").unwrap_or_default(),
            driver_license: r
                .get::<Option<String>, _>("truck_driver_license")
                .unwrap_or_default(),
            experience_years: r
                .get::<Option<String>, _>("truck_experience_years")
                .unwrap_or_default(),
            location: lat.zip(lng).map(|(lat, lng)| Location { lat, lng }),
            current_status: current_status.as_deref().and_then(TruckStatus::from_str),
        })
    } else {
        None
    };

    let organization_details = if role == Role::Sender {
        Some(OrganizationDetails {
            name: r.get::<Option<String>, _>("org_name").unwrap_or_default(),
            org_type: r.get::<Option<String>, _>("org_type").unwrap_or_default(),
            reg_number: r.get::<Option<String>, _>("org_reg_number").unwrap_or_default(),
            sector: r.get::<Option<String>, _>("org_sector").unwrap_or_default(),
            headquarters: r.get::<Option<String>, _>("org_headquarters").unwrap_or_default(),
        })
    } else {
        None
    };

    Ok(User {
        id: r.get("id"),
        name: r.get("name"),
        email: r.get("email"),
        password_hash: r.get("password_hash"),
        role,
        status,
        truck_details,
        organization_details,
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    })
}
