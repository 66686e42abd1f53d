use axum::{
    routing::{get, post},
    Router,
};

pub mod notifications;
pub mod rate;
pub mod subscriptions;
pub mod system;

/// Router for the versioned API (`/api/v1`).
pub fn router() -> Router {
    Router::new()
        .route("/rate", get(rate::get_rate))
        .route("/subscribe", post(subscriptions::subscribe))
        .route("/unsubscribe", post(subscriptions::unsubscribe))
        .route("/sendEmails", post(notifications::send_emails))
}
