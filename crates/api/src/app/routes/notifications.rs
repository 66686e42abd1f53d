use std::sync::Arc;

use axum::{extract::Extension, response::IntoResponse, Json};

use crate::app::dto::NotifyResponse;
use crate::app::errors::internal_error;
use crate::app::services::AppServices;

/// Queue one notification per subscriber. Delivery happens asynchronously
/// through the outbox publisher and the consumer.
pub async fn send_emails(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.notifier.run().await {
        Ok(report) => Json(NotifyResponse {
            queued: report.queued,
            batches: report.batches,
        })
        .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "notification run failed");
            internal_error()
        }
    }
}
