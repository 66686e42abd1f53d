use serde::{Deserialize, Serialize};

/// `GET /api/v1/rate` body. `price` is the provider's decimal string, untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateResponse {
    pub base_code: String,
    pub target_code: String,
    pub price: String,
}

/// Form body of subscribe/unsubscribe.
#[derive(Debug, Deserialize)]
pub struct EmailForm {
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct NotifyResponse {
    pub queued: usize,
    pub batches: usize,
}
