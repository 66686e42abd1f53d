use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use ratewatch_infra::saga::SubscribeError;
use ratewatch_infra::subscriptions::StoreError;

pub fn subscribe_error_to_response(err: SubscribeError) -> axum::response::Response {
    match err {
        SubscribeError::Duplicate => {
            json_error(StatusCode::CONFLICT, "already_subscribed", "email already subscribed")
        }
        SubscribeError::InvalidEmail(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_email", msg),
        SubscribeError::Internal => internal_error(),
    }
}

pub fn unsubscribe_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", "email is not subscribed"),
        StoreError::Duplicate(_) | StoreError::Storage(_) => {
            tracing::error!(error = %err, "unsubscribe failed");
            internal_error()
        }
    }
}

/// Details are logged by the caller, never returned.
pub fn internal_error() -> axum::response::Response {
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "internal error")
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
