use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use std::sync::Arc;
use tracing::instrument;

use super::{
    invalid_body,
    types::{Credentials, MessageResponse},
};
use crate::gatehouse::service::AuthService;

#[utoipa::path(
    post,
    path = "/register",
    request_body = Credentials,
    responses(
        (status = 200, description = "Registration successful", body = MessageResponse, content_type = "application/json"),
        (status = 400, description = "Missing or malformed body, or empty fields", body = MessageResponse),
        (status = 409, description = "Username is already taken", body = MessageResponse),
        (status = 500, description = "Credential store or hashing failure", body = MessageResponse),
    ),
    tag = "auth"
)]
#[instrument(skip(auth, payload))]
pub async fn register(
    auth: Extension<Arc<AuthService>>,
    payload: Option<Json<Credentials>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return invalid_body();
    };

    match auth.register(&request.username, &request.password).await {
        Ok(()) => (
            StatusCode::OK,
            Json(MessageResponse::new("Registration successful")),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}
