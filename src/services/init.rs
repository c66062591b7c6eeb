//! Startup helpers:
//! - database connection + migrations
//! - bootstrap administrator account
//!
//! Keeps `main.rs` focused on wiring.

use std::path::Path;

use anyhow::Result;
use sqlx::sqlite::SqliteJournalMode;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db::{CreateUser, RegistrationStatus, Role, UserRepository};
use crate::services::auth::AuthService;

/// Redact credentials from a database URL before logging.
///
/// Falls back to dropping everything before '@', or to "(redacted)".
pub fn redact_db_url(db_url: &str) -> String {
    if let Ok(url) = url::Url::parse(db_url) {
        let host = url.host_str().unwrap_or("");
        let port_part = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
        format!("{}://{}{}{}", url.scheme(), host, port_part, url.path())
    } else if let Some(at_pos) = db_url.find('@') {
        format!("(redacted){}", &db_url[at_pos + 1..])
    } else {
        "(redacted)".to_string()
    }
}

/// Open the SQLite pool in WAL mode and run migrations.
///
/// The database file's parent directory is created when missing.
pub async fn init_db(config: &Config) -> Result<SqlitePool> {
    let db_url = &config.database.url;
    tracing::info!("Connecting to database: {}", redact_db_url(db_url));

    let db_path = db_url.strip_prefix("sqlite://").unwrap_or(db_url);
    let db_file_path = Path::new(db_path);

    if let Some(parent) = db_file_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow::anyhow!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                )
            })?;
        }
    }

    let connect_options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_with(connect_options)
        .await?;

    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Create the administrator account from `ADMIN_*` settings if it does not exist.
///
/// Returns true when an account was created.
pub async fn bootstrap_admin(pool: &SqlitePool, config: &Config) -> Result<bool> {
    let admin = &config.admin;
    let (name, email, password) = match (&admin.name, &admin.email, &admin.password) {
        (Some(name), Some(email), Some(password)) => (name, email, password),
        (None, None, None) => {
            tracing::info!("No bootstrap administrator configured");
            return Ok(false);
        }
        _ => {
            tracing::warn!(
                "ADMIN_NAME, ADMIN_EMAIL and ADMIN_PASSWORD must all be set to bootstrap an administrator"
            );
            return Ok(false);
        }
    };

    let email = email.trim().to_lowercase();
    if let Some(existing) = UserRepository::find_by_email(pool, &email).await? {
        if existing.role != Role::Admin {
            anyhow::bail!("Bootstrap administrator email {} belongs to a {} account", email, existing.role);
        }
        tracing::debug!("Administrator {} already exists", existing.id);
        return Ok(false);
    }

    let password_hash = AuthService::hash_password(password, config.auth.bcrypt_cost).await?;
    let user = UserRepository::create(
        pool,
        CreateUser {
            name: name.trim().to_string(),
            email,
            password_hash,
            role: Role::Admin,
            status: RegistrationStatus::Approved,
            truck_details: None,
            organization_details: None,
        },
    )
    .await?;

    tracing::info!("Created bootstrap administrator {}", user.id);
    Ok(true)
}
