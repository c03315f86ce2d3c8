use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use super::types::SessionResponse;
use crate::gatehouse::service::AuthService;

#[utoipa::path(
    get,
    path = "/session",
    responses(
        (status = 200, description = "Session is active", body = SessionResponse),
        (status = 204, description = "No active session")
    ),
    tag = "auth"
)]
pub async fn session(headers: HeaderMap, auth: Extension<Arc<AuthService>>) -> impl IntoResponse {
    // Anything short of a valid token is anonymous, not an error.
    match auth.authenticate(&headers).await {
        Ok(Some(username)) => (StatusCode::OK, Json(SessionResponse { username })).into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}
