use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;

use bundlestock_infra::CommandError;

use crate::app::dto::ApiResponse;

pub fn command_error_to_response(err: CommandError) -> axum::response::Response {
    match err {
        CommandError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, msg),
        CommandError::NotFound => json_error(StatusCode::NOT_FOUND, "bundle not found"),
        CommandError::InvalidState(msg) => json_error(StatusCode::BAD_REQUEST, msg),
        e @ CommandError::InsufficientStock { .. } => {
            json_error(StatusCode::BAD_REQUEST, e.to_string())
        }
        CommandError::Conflict(msg) => json_error(StatusCode::CONFLICT, msg),
        // Details were already logged by the service.
        CommandError::Store(_) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
        }
    }
}

pub fn json_rejection_to_response(rejection: JsonRejection) -> axum::response::Response {
    json_error(
        StatusCode::BAD_REQUEST,
        format!("invalid request body: {}", rejection.body_text()),
    )
}

pub fn json_error(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    (status, axum::Json(ApiResponse::failure(message))).into_response()
}
