//! Shared fixtures for in-crate tests: an in-memory database with migrations
//! applied, seeded accounts, and an `AppState` wired to a local-only hub.

use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db::{
    AidRequest, AidRequestRepository, CreateAidRequest, CreateUser, RegistrationStatus, Role,
    TruckDetails, User, UserRepository,
};
use crate::realtime::RoomHub;
use crate::AppState;

pub const TEST_PASSWORD: &str = "correct horse battery";
/// Lowest cost bcrypt accepts.
pub const TEST_BCRYPT_COST: u32 = 4;

pub async fn test_pool() -> SqlitePool {
    // A single never-recycled connection keeps the in-memory database alive.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations apply");
    pool
}

pub async fn seed_user(
    pool: &SqlitePool,
    email: &str,
    role: Role,
    status: RegistrationStatus,
) -> User {
    let password_hash = bcrypt::hash(TEST_PASSWORD, TEST_BCRYPT_COST).expect("hash");
    UserRepository::create(
        pool,
        CreateUser {
            name: email.split('@').next().unwrap_or(email).to_string(),
            email: email.to_string(),
            password_hash,
            role,
            status,
            truck_details: (role == Role::Driver).then(TruckDetails::default),
            organization_details: None,
        },
    )
    .await
    .expect("seed user")
}

pub async fn seed_aid_request(pool: &SqlitePool, sender_id: &str) -> AidRequest {
    AidRequestRepository::create(
        pool,
        CreateAidRequest {
            sender_id: sender_id.to_string(),
            aid_type: "Medical Supplies".to_string(),
            description: "First aid kits".to_string(),
            quantity: "40 boxes".to_string(),
            destination: "Dessie".to_string(),
        },
    )
    .await
    .expect("seed aid request")
}

/// Application state backed by an in-memory database and a process-local hub.
pub async fn test_state() -> (Arc<AppState>, Arc<RoomHub>) {
    let pool = test_pool().await;
    let hub = Arc::new(RoomHub::new());
    let state = Arc::new(AppState {
        db: pool,
        config: Config::for_tests(),
        broadcaster: hub.clone(),
        hub: hub.clone(),
    });
    (state, hub)
}
