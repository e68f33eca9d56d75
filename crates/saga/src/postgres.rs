use async_trait::async_trait;
use chrono::Utc;
use common::{EventId, SagaId};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::error::{Result, SagaError};
use crate::model::{Saga, Step};
use crate::state::SagaStatus;
use crate::store::SagaStateStore;

/// PostgreSQL-backed saga state store.
///
/// Steps and scratch data are stored as JSONB columns; the event log's
/// unique index on `event_id` is the idempotency guard.
#[derive(Clone)]
pub struct PostgresSagaStateStore {
    pool: PgPool,
}

impl PostgresSagaStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_saga(row: PgRow) -> Result<Saga> {
        let status: String = row.try_get("status")?;
        let steps: serde_json::Value = row.try_get("steps")?;
        let data: serde_json::Value = row.try_get("data")?;
        let steps: Vec<Step> = serde_json::from_value(steps)?;

        Ok(Saga {
            id: SagaId::new(row.try_get::<String, _>("id")?),
            name: row.try_get("name")?,
            status: SagaStatus::parse(&status).unwrap_or(SagaStatus::Failed),
            steps,
            data: serde_json::from_value(data)?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            completed_at: row.try_get("completed_at")?,
            last_error: row.try_get("last_error")?,
            retry_count: row.try_get("retry_count")?,
            last_step_id: row.try_get("last_step_id")?,
        })
    }

    fn not_found(saga_id: &SagaId, result: sqlx::postgres::PgQueryResult) -> Result<()> {
        if result.rows_affected() == 0 {
            return Err(SagaError::SagaNotFound(saga_id.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl SagaStateStore for PostgresSagaStateStore {
    async fn save_saga(&self, saga: &Saga) -> Result<()> {
        let steps = serde_json::to_value(&saga.steps)?;
        let data = serde_json::to_value(&saga.data)?;
        let last_step_id = saga.last_completed_step_id();

        sqlx::query(
            r#"
            INSERT INTO saga_states
                (id, name, status, steps, data, created_at, updated_at, completed_at, last_error, retry_count, last_step_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                status = EXCLUDED.status,
                steps = EXCLUDED.steps,
                data = EXCLUDED.data,
                updated_at = EXCLUDED.updated_at,
                completed_at = EXCLUDED.completed_at,
                last_error = EXCLUDED.last_error,
                retry_count = GREATEST(saga_states.retry_count, EXCLUDED.retry_count),
                last_step_id = EXCLUDED.last_step_id
            "#,
        )
        .bind(saga.id.as_str())
        .bind(&saga.name)
        .bind(saga.status.as_str())
        .bind(steps)
        .bind(data)
        .bind(saga.created_at)
        .bind(Utc::now())
        .bind(saga.completed_at)
        .bind(&saga.last_error)
        .bind(saga.retry_count)
        .bind(last_step_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_saga(&self, saga_id: &SagaId) -> Result<Saga> {
        let row = sqlx::query(
            r#"
            SELECT id, name, status, steps, data, created_at, updated_at, completed_at, last_error, retry_count, last_step_id
            FROM saga_states
            WHERE id = $1
            "#,
        )
        .bind(saga_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_saga(row),
            None => Err(SagaError::SagaNotFound(saga_id.clone())),
        }
    }

    async fn update_saga_status(&self, saga_id: &SagaId, status: SagaStatus) -> Result<()> {
        let completed_at = (status == SagaStatus::Completed).then(Utc::now);

        let result = sqlx::query(
            r#"
            UPDATE saga_states
            SET status = $2, updated_at = $3, completed_at = COALESCE($4, completed_at)
            WHERE id = $1
            "#,
        )
        .bind(saga_id.as_str())
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(completed_at)
        .execute(&self.pool)
        .await?;

        Self::not_found(saga_id, result)
    }

    async fn increment_retry_count(&self, saga_id: &SagaId) -> Result<()> {
        let result =
            sqlx::query("UPDATE saga_states SET retry_count = retry_count + 1 WHERE id = $1")
                .bind(saga_id.as_str())
                .execute(&self.pool)
                .await?;

        Self::not_found(saga_id, result)
    }

    async fn log_event(
        &self,
        saga_id: &SagaId,
        event_id: &EventId,
        event_type: events::EventType,
    ) -> Result<()> {
        // The unique index on event_id makes duplicate inserts a no-op.
        sqlx::query(
            r#"
            INSERT INTO saga_event_log (saga_id, event_id, event_type, status, created_at, processed_at, retry_count)
            VALUES ($1, $2, $3, 'processed', $4, $4, 0)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(saga_id.as_str())
        .bind(event_id.as_str())
        .bind(event_type.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn is_event_processed(&self, event_id: &EventId) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM saga_event_log WHERE event_id = $1)")
                .bind(event_id.as_str())
                .fetch_one(&self.pool)
                .await?;

        Ok(exists)
    }
}
