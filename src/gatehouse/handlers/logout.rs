use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tracing::instrument;

use super::types::MessageResponse;
use crate::gatehouse::service::AuthService;

#[utoipa::path(
    post,
    path = "/logout",
    responses(
        (status = 200, description = "Session cleared and cookie expired", body = MessageResponse, content_type = "application/json"),
        (status = 500, description = "Session store failure", body = MessageResponse),
    ),
    tag = "auth"
)]
#[instrument(skip(headers, auth))]
pub async fn logout(headers: HeaderMap, auth: Extension<Arc<AuthService>>) -> impl IntoResponse {
    match auth.logout(&headers).await {
        Ok(cookie) => {
            let mut response_headers = HeaderMap::new();
            response_headers.insert(SET_COOKIE, cookie);
            (
                StatusCode::OK,
                response_headers,
                Json(MessageResponse::new("Logout successful")),
            )
                .into_response()
        }
        Err(err) => err.into_response(),
    }
}
