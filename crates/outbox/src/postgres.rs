use async_trait::async_trait;
use chrono::{Duration, Utc};
use events::Event;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::error::{OutboxError, Result};
use crate::model::{OutboxEvent, OutboxStatus};
use crate::store::OutboxStore;

/// PostgreSQL-backed outbox store.
///
/// Shares the service's connection pool with the saga state store so a
/// deployment can wrap a state write and the outbox append in a single
/// transaction.
#[derive(Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_event(row: PgRow) -> Result<OutboxEvent> {
        let status: String = row.try_get("status")?;
        let event_type: String = row.try_get("event_type")?;

        Ok(OutboxEvent {
            id: row.try_get("id")?,
            event_type: serde_json::from_value(serde_json::Value::String(event_type))?,
            aggregate_id: row.try_get("aggregate_id")?,
            payload: row.try_get("payload")?,
            status: OutboxStatus::parse(&status).unwrap_or(OutboxStatus::Failed),
            created_at: row.try_get("created_at")?,
            processed_at: row.try_get("processed_at")?,
            retry_count: row.try_get("retry_count")?,
            error: row.try_get("error")?,
        })
    }

    fn not_found(id: &str, result: sqlx::postgres::PgQueryResult) -> Result<()> {
        if result.rows_affected() == 0 {
            return Err(OutboxError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    async fn save_event(&self, event: &Event) -> Result<()> {
        let row = OutboxEvent::from_envelope(event)?;

        sqlx::query(
            r#"
            INSERT INTO outbox_events (id, event_type, aggregate_id, payload, status, created_at, retry_count)
            VALUES ($1, $2, $3, $4, $5, $6, 0)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&row.id)
        .bind(row.event_type.as_str())
        .bind(&row.aggregate_id)
        .bind(&row.payload)
        .bind(row.status.as_str())
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_pending(&self, limit: usize) -> Result<Vec<OutboxEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, event_type, aggregate_id, payload, status, created_at, processed_at, retry_count, error
            FROM outbox_events
            WHERE status = 'pending'
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn mark_processing(&self, id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE outbox_events SET status = 'processing' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Self::not_found(id, result)
    }

    async fn mark_processed(&self, id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE outbox_events SET status = 'processed', processed_at = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Self::not_found(id, result)
    }

    async fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        let result =
            sqlx::query("UPDATE outbox_events SET status = 'failed', error = $2 WHERE id = $1")
                .bind(id)
                .bind(error)
                .execute(&self.pool)
                .await?;
        Self::not_found(id, result)
    }

    async fn increment_retry_count(&self, id: &str) -> Result<()> {
        let result =
            sqlx::query("UPDATE outbox_events SET retry_count = retry_count + 1 WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await?;
        Self::not_found(id, result)
    }

    async fn requeue_failed(&self, id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE outbox_events SET status = 'pending', error = NULL WHERE id = $1 AND status = 'failed'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Self::not_found(id, result)
    }

    async fn release_stuck(&self, stuck_after: Duration) -> Result<u64> {
        let cutoff = Utc::now() - stuck_after;
        let result = sqlx::query(
            "UPDATE outbox_events SET status = 'pending' WHERE status = 'processing' AND created_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
