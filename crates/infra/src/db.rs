//! Postgres bootstrap: pool with connect retry, and idempotent schema setup.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

const CONNECT_ATTEMPTS: u32 = 10;
const CONNECT_BACKOFF: Duration = Duration::from_secs(2);

/// Connect to Postgres, retrying while the database comes up.
pub async fn connect(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let mut attempt = 1;
    loop {
        match PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
        {
            Ok(pool) => {
                info!(attempt, "connected to postgres");
                return Ok(pool);
            }
            Err(err) if attempt < CONNECT_ATTEMPTS => {
                warn!(attempt, error = %err, "postgres not reachable, retrying");
                attempt += 1;
                tokio::time::sleep(CONNECT_BACKOFF).await;
            }
            Err(err) => return Err(err),
        }
    }
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS subscriptions (
        email TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS subscriptions_email_key ON subscriptions (email)",
    r#"
    CREATE TABLE IF NOT EXISTS events (
        id BIGSERIAL PRIMARY KEY,
        data TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS offsets (
        topic TEXT NOT NULL,
        "partition" INTEGER NOT NULL,
        "offset" BIGINT NOT NULL DEFAULT 0,
        PRIMARY KEY (topic, "partition")
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS consumed_events (
        id BIGINT PRIMARY KEY,
        data TEXT NOT NULL,
        consumed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS saga_states (
        id UUID PRIMARY KEY,
        current_step INTEGER NOT NULL,
        email TEXT NOT NULL,
        is_compensating BOOLEAN NOT NULL DEFAULT FALSE,
        status TEXT NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
];

/// Create every table the stores use. Safe to run on each start.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    info!(statements = SCHEMA.len(), "schema ready");
    Ok(())
}
