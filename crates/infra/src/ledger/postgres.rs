use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use ratewatch_events::ConsumedEvent;

use super::{ConsumedEventLedger, LedgerError};

/// Postgres-backed ledger over `consumed_events(id PRIMARY KEY, data, consumed_at)`.
#[derive(Debug, Clone)]
pub struct PostgresLedger {
    pool: Arc<PgPool>,
}

impl PostgresLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl ConsumedEventLedger for PostgresLedger {
    #[instrument(skip(self), err)]
    async fn is_consumed(&self, id: u64) -> Result<bool, LedgerError> {
        let row = sqlx::query("SELECT EXISTS (SELECT 1 FROM consumed_events WHERE id = $1) AS found")
            .bind(to_db_id(id)?)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("is_consumed", e))?;

        row.try_get::<bool, _>("found")
            .map_err(|e| map_sqlx_error("is_consumed", e))
    }

    #[instrument(skip(self, event), fields(event_id = event.id), err)]
    async fn add_consumed_event(&self, event: &ConsumedEvent) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO consumed_events (id, data, consumed_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(to_db_id(event.id)?)
        .bind(&event.data)
        .bind(event.consumed_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                LedgerError::AlreadyConsumed(event.id)
            } else {
                map_sqlx_error("add_consumed_event", e)
            }
        })?;

        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn find(&self, id: u64) -> Result<Option<ConsumedEvent>, LedgerError> {
        let row = sqlx::query("SELECT id, data, consumed_at FROM consumed_events WHERE id = $1")
            .bind(to_db_id(id)?)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(ConsumedEvent {
            id,
            data: row.try_get("data").map_err(|e| map_sqlx_error("find", e))?,
            consumed_at: row
                .try_get("consumed_at")
                .map_err(|e| map_sqlx_error("find", e))?,
        }))
    }
}

fn to_db_id(id: u64) -> Result<i64, LedgerError> {
    i64::try_from(id).map_err(|_| LedgerError::Storage(format!("event id {id} out of range")))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => {
            LedgerError::Storage(format!("database error in {}: {}", operation, db_err.message()))
        }
        other => LedgerError::Storage(format!("{operation}: {other}")),
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
