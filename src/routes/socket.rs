use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::HeaderMap,
    response::Response,
};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::realtime::session;
use crate::routes::auth::bearer_token;
use crate::services::auth::AuthService;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SocketQuery {
    pub token: Option<String>,
}

/// Authenticate, then hand the socket to the session loop. Browsers cannot set
/// headers on upgrade requests, so the token may also come as `?token=`.
pub async fn upgrade(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<SocketQuery>,
    ws: Option<WebSocketUpgrade>,
) -> AppResult<Response> {
    let token = bearer_token(&headers)
        .map(str::to_string)
        .or(query.token.filter(|t| !t.trim().is_empty()))
        .ok_or(AppError::Unauthorized)?;

    let user = AuthService::get_user_from_token(&state, &token)
        .await
        .map_err(|e| {
            tracing::debug!("Rejected socket upgrade: {:?}", e);
            AppError::Unauthorized
        })?;

    let ws = ws.ok_or_else(|| AppError::BadRequest("Expected a WebSocket upgrade".to_string()))?;
    Ok(ws.on_upgrade(move |socket| session::run(socket, state, user)))
}
