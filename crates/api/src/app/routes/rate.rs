use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use ratewatch_infra::rate_api::RateFetcher;

use crate::app::dto::RateResponse;
use crate::app::errors::json_error;
use crate::app::services::AppServices;

pub async fn get_rate(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.fetcher.fetch(&services.base, &services.target).await {
        Ok(price) => Json(RateResponse {
            base_code: services.base.to_string(),
            target_code: services.target.to_string(),
            price,
        })
        .into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "rate unavailable from every provider");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "rate_unavailable", "exchange rate is unavailable")
        }
    }
}
