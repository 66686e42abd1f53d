//! Postgres-backed outbox.
//!
//! Events live in `events(id BIGSERIAL, data TEXT, created_at TIMESTAMPTZ)`; the
//! publisher cursor in `offsets(topic, "partition", "offset")` keyed by
//! `(topic, "partition")`.
//!
//! A publisher transaction locks its offset row (`SELECT ... FOR UPDATE`) for its
//! whole lifetime, so two cycles on the same pair never interleave. Dropping an
//! uncommitted `sqlx::Transaction` issues a rollback.
//!
//! Appends take a transaction-scoped advisory lock before drawing an id. A
//! `BIGSERIAL` value is handed out before its row commits, so two concurrent
//! inserts could otherwise become visible out of order; a publisher reading in
//! that window would move its offset past the id still in flight and never
//! publish it. Holding the lock until commit keeps visibility order equal to
//! id order.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{instrument, Span};

use ratewatch_events::{Event, EventData, Offset};

use super::{OffsetStore, OutboxError, OutboxStore, OutboxTransaction};

#[derive(Debug, Clone)]
pub struct PostgresOutboxStore {
    pool: Arc<PgPool>,
}

impl PostgresOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    #[instrument(skip(self, data), fields(event_id), err)]
    async fn add_event(&self, data: &EventData) -> Result<Event, OutboxError> {
        // Serialize before touching the database: a bad payload writes nothing.
        let payload = data
            .to_json()
            .map_err(|e| OutboxError::Serialization(e.to_string()))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| OutboxError::Transaction(format!("begin failed: {e}")))?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(APPEND_LOCK_KEY)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("add_event", e))?;

        let row = sqlx::query(
            r#"
            INSERT INTO events (data, created_at)
            VALUES ($1, $2)
            RETURNING id, data, created_at
            "#,
        )
        .bind(&payload)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("add_event", e))?;

        tx.commit()
            .await
            .map_err(|e| OutboxError::Transaction(format!("commit failed: {e}")))?;

        let event = EventRow::from_row(&row)?.into_event()?;
        Span::current().record("event_id", event.id);
        Ok(event)
    }

    #[instrument(skip(self), fields(event_count), err)]
    async fn fetch_unpublished_events(&self, last_offset: u64) -> Result<Vec<Event>, OutboxError> {
        let rows = sqlx::query(UNPUBLISHED_SQL)
            .bind(to_db_id(last_offset)?)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_unpublished_events", e))?;

        let events = decode_events(rows)?;
        Span::current().record("event_count", events.len());
        Ok(events)
    }

    #[instrument(skip(self), err)]
    async fn begin(&self) -> Result<Box<dyn OutboxTransaction>, OutboxError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| OutboxError::Transaction(format!("begin failed: {e}")))?;

        Ok(Box::new(PostgresOutboxTransaction { tx }))
    }

    #[instrument(skip(self), err)]
    async fn committed_offset(&self, topic: &str, partition: i32) -> Result<u64, OutboxError> {
        let row = sqlx::query(
            r#"
            SELECT "offset"
            FROM offsets
            WHERE topic = $1 AND "partition" = $2
            "#,
        )
        .bind(topic)
        .bind(partition)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("committed_offset", e))?;

        decode_offset(row)
    }

    #[instrument(skip(self), fields(pruned), err)]
    async fn prune_published(
        &self,
        before: DateTime<Utc>,
        up_to_offset: u64,
    ) -> Result<u64, OutboxError> {
        let result = sqlx::query("DELETE FROM events WHERE created_at < $1 AND id <= $2")
            .bind(before)
            .bind(to_db_id(up_to_offset)?)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("prune_published", e))?;

        Span::current().record("pruned", result.rows_affected());
        Ok(result.rows_affected())
    }
}

/// One publisher cycle's database transaction.
struct PostgresOutboxTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl OffsetStore for PostgresOutboxTransaction {
    async fn last_offset(&mut self, topic: &str, partition: i32) -> Result<u64, OutboxError> {
        // Materialise the row so there is always something to lock.
        sqlx::query(
            r#"
            INSERT INTO offsets (topic, "partition", "offset")
            VALUES ($1, $2, 0)
            ON CONFLICT (topic, "partition") DO NOTHING
            "#,
        )
        .bind(topic)
        .bind(partition)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("last_offset", e))?;

        let row = sqlx::query(
            r#"
            SELECT "offset"
            FROM offsets
            WHERE topic = $1 AND "partition" = $2
            FOR UPDATE
            "#,
        )
        .bind(topic)
        .bind(partition)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("last_offset", e))?;

        decode_offset(row)
    }

    async fn update_offset(&mut self, offset: &Offset) -> Result<(), OutboxError> {
        sqlx::query(
            r#"
            INSERT INTO offsets (topic, "partition", "offset")
            VALUES ($1, $2, $3)
            ON CONFLICT (topic, "partition")
            DO UPDATE SET "offset" = GREATEST(offsets."offset", EXCLUDED."offset")
            "#,
        )
        .bind(&offset.topic)
        .bind(offset.partition)
        .bind(to_db_id(offset.offset)?)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_offset", e))?;

        Ok(())
    }
}

#[async_trait]
impl OutboxTransaction for PostgresOutboxTransaction {
    async fn fetch_unpublished_events(&mut self, last_offset: u64) -> Result<Vec<Event>, OutboxError> {
        let rows = sqlx::query(UNPUBLISHED_SQL)
            .bind(to_db_id(last_offset)?)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("fetch_unpublished_events", e))?;

        decode_events(rows)
    }

    async fn commit(self: Box<Self>) -> Result<(), OutboxError> {
        self.tx
            .commit()
            .await
            .map_err(|e| OutboxError::Transaction(format!("commit failed: {e}")))
    }

    async fn rollback(self: Box<Self>) -> Result<(), OutboxError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| OutboxError::Transaction(format!("rollback failed: {e}")))
    }
}

/// Advisory lock id guarding `events` appends.
const APPEND_LOCK_KEY: i64 = 0x7261_7465_7761_7463;

const UNPUBLISHED_SQL: &str = r#"
    SELECT id, data, created_at
    FROM events
    WHERE id > $1
    ORDER BY id ASC
"#;

fn to_db_id(value: u64) -> Result<i64, OutboxError> {
    i64::try_from(value).map_err(|_| OutboxError::Storage(format!("id {value} out of range")))
}

fn decode_offset(row: Option<sqlx::postgres::PgRow>) -> Result<u64, OutboxError> {
    match row {
        Some(row) => {
            let offset: i64 = row
                .try_get("offset")
                .map_err(|e| map_sqlx_error("decode_offset", e))?;
            Ok(offset.max(0) as u64)
        }
        None => Ok(0),
    }
}

fn decode_events(rows: Vec<sqlx::postgres::PgRow>) -> Result<Vec<Event>, OutboxError> {
    rows.iter()
        .map(|row| EventRow::from_row(row)?.into_event())
        .collect()
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> OutboxError {
    match err {
        sqlx::Error::Database(db_err) => {
            OutboxError::Storage(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed => OutboxError::Storage(format!("connection pool closed in {operation}")),
        other => OutboxError::Storage(format!("{operation}: {other}")),
    }
}

// SQLx row types

#[derive(Debug)]
struct EventRow {
    id: i64,
    data: String,
    created_at: DateTime<Utc>,
}

impl EventRow {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, OutboxError> {
        let get = |e| map_sqlx_error("decode_event", e);
        Ok(EventRow {
            id: row.try_get("id").map_err(get)?,
            data: row.try_get("data").map_err(get)?,
            created_at: row.try_get("created_at").map_err(get)?,
        })
    }

    fn into_event(self) -> Result<Event, OutboxError> {
        let id = u64::try_from(self.id)
            .map_err(|_| OutboxError::Storage(format!("negative event id {}", self.id)))?;
        Ok(Event {
            id,
            data: self.data,
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::db;

    /// Runs only when `RATEWATCH_TEST_DATABASE_URL` points at a scratch database.
    async fn store() -> Option<PostgresOutboxStore> {
        let url = std::env::var("RATEWATCH_TEST_DATABASE_URL").ok()?;
        let pool = db::connect(&url).await.unwrap();
        db::migrate(&pool).await.unwrap();
        Some(PostgresOutboxStore::new(pool))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_are_never_skipped_by_a_polling_reader() {
        let Some(store) = store().await else {
            return;
        };
        let store = Arc::new(store);
        let start = store
            .fetch_unpublished_events(0)
            .await
            .unwrap()
            .last()
            .map_or(0, |e| e.id);

        let writers: Vec<_> = (0..200)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let data = EventData::new(format!("user{i}@example.com"), 41.0);
                    store.add_event(&data).await.unwrap().id
                })
            })
            .collect();

        // Poll like the publisher does: advance to the highest id seen.
        let mut offset = start;
        let mut seen = BTreeSet::new();
        while seen.len() < writers.len() {
            for event in store.fetch_unpublished_events(offset).await.unwrap() {
                offset = offset.max(event.id);
                seen.insert(event.id);
            }
            tokio::task::yield_now().await;
            if writers.iter().all(|w| w.is_finished()) {
                for event in store.fetch_unpublished_events(offset).await.unwrap() {
                    offset = offset.max(event.id);
                    seen.insert(event.id);
                }
                break;
            }
        }

        let mut written = BTreeSet::new();
        for writer in writers {
            written.insert(writer.await.unwrap());
        }
        assert_eq!(seen, written);
    }
}
