//! HTTP handlers.
//!
//! Handlers only decode the request and map `AuthError` to a status; every rule
//! lives in `AuthService`.

pub mod health;
pub mod login;
pub mod logout;
pub mod register;
pub mod session;
pub mod types;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use super::service::AuthError;
use types::MessageResponse;

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        // Infrastructure details stay in the logs.
        let (status, message) = match &self {
            Self::Validation(message) => (StatusCode::BAD_REQUEST, *message),
            Self::InvalidCredentials => (StatusCode::UNAUTHORIZED, "Invalid username or password"),
            Self::Conflict => (StatusCode::CONFLICT, "Username is already taken"),
            Self::Internal(_) | Self::Persistence(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        };
        (status, Json(MessageResponse::new(message))).into_response()
    }
}

/// Response for a body that is missing or not valid JSON.
pub(crate) fn invalid_body() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(MessageResponse::new("Invalid request body")),
    )
        .into_response()
}
