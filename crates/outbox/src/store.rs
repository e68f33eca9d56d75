use async_trait::async_trait;
use chrono::Duration;
use events::Event;

use crate::error::Result;
use crate::model::OutboxEvent;

/// Durable store for events awaiting publication.
///
/// `save_event` must be called only after the state change it accompanies
/// has committed; the publisher loop is the authoritative retry point, so
/// delivery is at-least-once and consumers dedupe on the event ID.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Inserts an envelope as a `pending` row.
    async fn save_event(&self, event: &Event) -> Result<()>;

    /// Returns up to `limit` pending rows ordered by `created_at` ascending.
    async fn get_pending(&self, limit: usize) -> Result<Vec<OutboxEvent>>;

    /// Transitions a row to `processing`.
    async fn mark_processing(&self, id: &str) -> Result<()>;

    /// Transitions a row to `processed` and stamps `processed_at`.
    async fn mark_processed(&self, id: &str) -> Result<()>;

    /// Transitions a row to `failed` and records the error.
    async fn mark_failed(&self, id: &str, error: &str) -> Result<()>;

    /// Increments the row's publish attempt counter.
    async fn increment_retry_count(&self, id: &str) -> Result<()>;

    /// Moves a `failed` row back to `pending` (admin requeue).
    async fn requeue_failed(&self, id: &str) -> Result<()>;

    /// Reverts `processing` rows older than `stuck_after` back to `pending`.
    ///
    /// Covers the publisher crashing between claim and publish. Returns the
    /// number of rows released.
    async fn release_stuck(&self, stuck_after: Duration) -> Result<u64>;
}
