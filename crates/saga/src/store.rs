//! Durable saga state and the idempotency ledger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{EventId, SagaId};
use events::EventType;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::Saga;
use crate::state::SagaStatus;

/// An entry in the event log.
///
/// The log is append-only; uniqueness on `event_id` is the idempotency
/// guard that makes duplicate deliveries observable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub saga_id: SagaId,
    pub event_id: EventId,
    pub event_type: EventType,
    /// `processed`, `failed` or `retrying`.
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub error: Option<String>,
}

/// Persistence for saga aggregates and the event log.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait SagaStateStore: Send + Sync {
    /// Upserts the saga by ID.
    ///
    /// Serializes steps and scratch data, stamps `updated_at` and refreshes
    /// the cached `last_step_id` from the highest-index completed step.
    async fn save_saga(&self, saga: &Saga) -> Result<()>;

    /// Loads the saga aggregate, failing with `SagaNotFound` if absent.
    async fn get_saga(&self, saga_id: &SagaId) -> Result<Saga>;

    /// Sets the saga status; `Completed` also stamps `completed_at`.
    async fn update_saga_status(&self, saga_id: &SagaId, status: SagaStatus) -> Result<()>;

    /// Increments the saga's retry counter.
    async fn increment_retry_count(&self, saga_id: &SagaId) -> Result<()>;

    /// Appends an event to the idempotency ledger.
    ///
    /// Inserting an `event_id` that already exists is a silent no-op, not an
    /// error; callers that need to distinguish use [`is_event_processed`]
    /// first.
    ///
    /// [`is_event_processed`]: SagaStateStore::is_event_processed
    async fn log_event(
        &self,
        saga_id: &SagaId,
        event_id: &EventId,
        event_type: EventType,
    ) -> Result<()>;

    /// Returns true when the event ID is already in the ledger.
    async fn is_event_processed(&self, event_id: &EventId) -> Result<bool>;
}
