use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{request::Parts, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDateTime;
use serde::Serialize;

use crate::db::{OrganizationDetails, RegistrationStatus, Role, TruckDetails, User};
use crate::error::{AppError, AppResult};
use crate::services::auth::{AuthService, Credentials, Registration};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/me", get(me))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Public view of an account. Never carries the password hash.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub status: RegistrationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truck_details: Option<TruckDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_details: Option<OrganizationDetails>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            name: u.name,
            email: u.email,
            role: u.role,
            status: u.status,
            truck_details: u.truck_details,
            organization_details: u.organization_details,
            created_at: u.created_at,
            updated_at: u.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub message: String,
    pub user: UserResponse,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub result: UserResponse,
    pub token: String,
}

// ============================================================================
// Handlers
// ============================================================================

async fn register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Registration>,
) -> AppResult<impl IntoResponse> {
    let user = AuthService::register(&state, body).await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User created successfully".to_string(),
            user: user.into(),
        }),
    ))
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Credentials>,
) -> AppResult<Json<LoginResponse>> {
    let (user, token) = AuthService::login(&state, body).await?;
    Ok(Json(LoginResponse {
        result: user.into(),
        token,
    }))
}

async fn me(AuthUser(user): AuthUser) -> Json<UserResponse> {
    Json(user.into())
}

// ============================================================================
// Extractors
// ============================================================================

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let header = headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())?;
    if !header.get(..7)?.eq_ignore_ascii_case("bearer ") {
        return None;
    }
    let token = header.get(7..)?.trim();
    (!token.is_empty()).then_some(token)
}

/// An approved, authenticated account.
pub struct AuthUser(pub User);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or_else(|| {
            tracing::debug!("Missing or malformed Authorization header");
            AppError::Unauthorized
        })?;

        let user = AuthService::get_user_from_token(state, token)
            .await
            .map_err(|e| {
                tracing::debug!("Failed to get user from token: {:?}", e);
                AppError::Unauthorized
            })?;

        tracing::debug!("Authenticated user: {}", user.id);
        Ok(AuthUser(user))
    }
}

/// An authenticated administrator.
pub struct AdminUser(pub User);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(AppError::Forbidden("Administrator access required".to_string()));
        }
        Ok(AdminUser(user))
    }
}
