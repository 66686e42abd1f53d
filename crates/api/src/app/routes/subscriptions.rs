use std::sync::Arc;

use axum::{
    extract::{rejection::FormRejection, Extension},
    http::StatusCode,
    response::IntoResponse,
    Form, Json,
};

use ratewatch_core::Email;
use ratewatch_infra::subscriptions::SubscriptionStore;

use crate::app::dto::{EmailForm, MessageResponse};
use crate::app::errors::{json_error, subscribe_error_to_response, unsubscribe_error_to_response};
use crate::app::services::AppServices;

fn email_field(form: Result<Form<EmailForm>, FormRejection>) -> Result<String, axum::response::Response> {
    let Form(form) = form
        .map_err(|e| json_error(StatusCode::BAD_REQUEST, "invalid_form", e.body_text()))?;
    match form.email {
        Some(email) if !email.trim().is_empty() => Ok(email),
        _ => Err(json_error(StatusCode::BAD_REQUEST, "invalid_form", "email is required")),
    }
}

pub async fn subscribe(
    Extension(services): Extension<Arc<AppServices>>,
    form: Result<Form<EmailForm>, FormRejection>,
) -> axum::response::Response {
    let email = match email_field(form) {
        Ok(email) => email,
        Err(resp) => return resp,
    };

    match services.saga.add_subscription(&email).await {
        Ok(()) => Json(MessageResponse { message: "subscribed" }).into_response(),
        Err(err) => subscribe_error_to_response(err),
    }
}

pub async fn unsubscribe(
    Extension(services): Extension<Arc<AppServices>>,
    form: Result<Form<EmailForm>, FormRejection>,
) -> axum::response::Response {
    let raw = match email_field(form) {
        Ok(email) => email,
        Err(resp) => return resp,
    };
    let email = match Email::parse(&raw) {
        Ok(email) => email,
        Err(err) => return json_error(StatusCode::BAD_REQUEST, "invalid_email", err.to_string()),
    };

    match services.subscriptions.delete_subscription(&email).await {
        Ok(()) => Json(MessageResponse { message: "unsubscribed" }).into_response(),
        Err(err) => unsubscribe_error_to_response(err),
    }
}
