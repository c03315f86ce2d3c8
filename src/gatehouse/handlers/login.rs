use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tracing::instrument;

use super::{
    invalid_body,
    types::{Credentials, MessageResponse},
};
use crate::gatehouse::service::AuthService;

#[utoipa::path(
    post,
    path = "/login",
    request_body = Credentials,
    responses(
        (status = 200, description = "Login successful, session cookie set", body = MessageResponse, content_type = "application/json"),
        (status = 400, description = "Missing or malformed body, or empty fields", body = MessageResponse),
        (status = 401, description = "Invalid username or password", body = MessageResponse),
        (status = 500, description = "Store, token or session failure", body = MessageResponse),
    ),
    tag = "auth"
)]
#[instrument(skip(headers, auth, payload))]
pub async fn login(
    headers: HeaderMap,
    auth: Extension<Arc<AuthService>>,
    payload: Option<Json<Credentials>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return invalid_body();
    };

    match auth
        .login(&headers, &request.username, &request.password)
        .await
    {
        Ok(cookie) => {
            // The token stays in the session record; the body only confirms.
            let mut response_headers = HeaderMap::new();
            response_headers.insert(SET_COOKIE, cookie);
            (
                StatusCode::OK,
                response_headers,
                Json(MessageResponse::new("Login successful")),
            )
                .into_response()
        }
        Err(err) => err.into_response(),
    }
}
