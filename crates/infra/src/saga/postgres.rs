use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use ratewatch_core::SagaId;
use ratewatch_events::{SagaState, SagaStatus};

use super::{SagaStateStore, SagaStoreError};

/// Postgres-backed saga state store over `saga_states`.
///
/// The upsert only touches rows still `in_progress`, so a terminal row is never
/// rewritten; zero affected rows is reported as [`SagaStoreError::Terminal`].
#[derive(Debug, Clone)]
pub struct PostgresSagaStateStore {
    pool: Arc<PgPool>,
}

impl PostgresSagaStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl SagaStateStore for PostgresSagaStateStore {
    #[instrument(
        skip(self, state),
        fields(saga_id = %state.id, step = state.current_step, status = %state.status),
        err
    )]
    async fn save(&self, state: &SagaState) -> Result<(), SagaStoreError> {
        let step = i32::try_from(state.current_step)
            .map_err(|_| SagaStoreError::Storage(format!("step {} out of range", state.current_step)))?;

        let result = sqlx::query(
            r#"
            INSERT INTO saga_states (id, current_step, email, is_compensating, status, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (id) DO UPDATE SET
                current_step = EXCLUDED.current_step,
                is_compensating = EXCLUDED.is_compensating,
                status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at
            WHERE saga_states.status = 'in_progress'
            "#,
        )
        .bind(state.id.as_uuid())
        .bind(step)
        .bind(&state.email)
        .bind(state.is_compensating)
        .bind(state.status.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("save", e))?;

        if result.rows_affected() == 0 {
            return Err(SagaStoreError::Terminal(state.id));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(saga_id = %id), err)]
    async fn load(&self, id: SagaId) -> Result<Option<SagaState>, SagaStoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, current_step, email, is_compensating, status
            FROM saga_states
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let decode = |e| map_sqlx_error("load", e);
        let step: i32 = row.try_get("current_step").map_err(decode)?;
        let status: String = row.try_get("status").map_err(decode)?;

        Ok(Some(SagaState {
            id: SagaId::from_uuid(row.try_get("id").map_err(decode)?),
            current_step: usize::try_from(step)
                .map_err(|_| SagaStoreError::Storage(format!("negative step {step}")))?,
            email: row.try_get("email").map_err(decode)?,
            is_compensating: row.try_get("is_compensating").map_err(decode)?,
            status: status.parse::<SagaStatus>().map_err(SagaStoreError::Storage)?,
        }))
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> SagaStoreError {
    match err {
        sqlx::Error::Database(db_err) => SagaStoreError::Storage(format!(
            "database error in {}: {}",
            operation,
            db_err.message()
        )),
        other => SagaStoreError::Storage(format!("{operation}: {other}")),
    }
}
