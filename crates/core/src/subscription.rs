use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::email::Email;

/// A subscriber record. The email is unique across the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub email: Email,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    pub fn new(email: Email, created_at: DateTime<Utc>) -> Self {
        Self { email, created_at }
    }
}
