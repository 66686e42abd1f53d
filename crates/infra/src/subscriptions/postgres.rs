//! Postgres-backed subscription store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Duplicate` |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / Io / other | N/A | `Storage` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{instrument, Span};

use ratewatch_core::{Email, Subscription};

use super::{StoreError, SubscriptionStore};

#[derive(Debug, Clone)]
pub struct PostgresSubscriptionStore {
    pool: Arc<PgPool>,
}

impl PostgresSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl SubscriptionStore for PostgresSubscriptionStore {
    #[instrument(skip(self, subscription), fields(email = %subscription.email), err)]
    async fn add_subscription(&self, subscription: &Subscription) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (email, created_at)
            VALUES ($1, $2)
            "#,
        )
        .bind(subscription.email.as_str())
        .bind(subscription.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Duplicate(subscription.email.to_string())
            } else {
                map_sqlx_error("add_subscription", e)
            }
        })?;

        Ok(())
    }

    #[instrument(skip(self), fields(email = %email), err)]
    async fn delete_subscription(&self, email: &Email) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE email = $1")
            .bind(email.as_str())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_subscription", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(email.to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(row_count), err)]
    async fn get_subscriptions(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Subscription>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT email, created_at
            FROM subscriptions
            ORDER BY created_at ASC, email ASC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_subscriptions", e))?;

        let mut subscriptions = Vec::with_capacity(rows.len());
        for row in rows {
            let email: String = row
                .try_get("email")
                .map_err(|e| map_sqlx_error("get_subscriptions", e))?;
            let created_at: DateTime<Utc> = row
                .try_get("created_at")
                .map_err(|e| map_sqlx_error("get_subscriptions", e))?;
            let email = Email::parse(&email)
                .map_err(|e| StoreError::Storage(format!("stored email is invalid: {e}")))?;
            subscriptions.push(Subscription::new(email, created_at));
        }

        Span::current().record("row_count", subscriptions.len());
        Ok(subscriptions)
    }

    #[instrument(skip(self), fields(email = %email), err)]
    async fn exists(&self, email: &Email) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT EXISTS (SELECT 1 FROM subscriptions WHERE email = $1) AS found")
            .bind(email.as_str())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("exists", e))?;

        row.try_get::<bool, _>("found")
            .map_err(|e| map_sqlx_error("exists", e))
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Duplicate(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Storage(format!("connection pool closed in {operation}")),
        other => StoreError::Storage(format!("{operation}: {other}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}
