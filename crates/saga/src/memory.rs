use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{EventId, SagaId};
use events::EventType;
use tokio::sync::RwLock;

use crate::error::{Result, SagaError};
use crate::model::Saga;
use crate::state::SagaStatus;
use crate::store::{EventLogEntry, SagaStateStore};

#[derive(Default)]
struct State {
    sagas: HashMap<String, Saga>,
    event_log: Vec<EventLogEntry>,
    event_ids: HashSet<String>,
}

/// In-memory saga state store for tests and brokerless deployments.
///
/// Provides the same interface and idempotency guarantees as the
/// PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemorySagaStateStore {
    state: Arc<RwLock<State>>,
}

impl InMemorySagaStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the event log (test helper).
    pub async fn event_log(&self) -> Vec<EventLogEntry> {
        self.state.read().await.event_log.clone()
    }
}

#[async_trait]
impl SagaStateStore for InMemorySagaStateStore {
    async fn save_saga(&self, saga: &Saga) -> Result<()> {
        let mut stored = saga.clone();
        stored.updated_at = Utc::now();
        stored.last_step_id = stored.last_completed_step_id();

        let mut state = self.state.write().await;
        // Retry count is owned by increment_retry_count; keep the stored one.
        if let Some(existing) = state.sagas.get(saga.id.as_str()) {
            stored.retry_count = stored.retry_count.max(existing.retry_count);
        }
        state.sagas.insert(saga.id.as_str().to_string(), stored);
        Ok(())
    }

    async fn get_saga(&self, saga_id: &SagaId) -> Result<Saga> {
        self.state
            .read()
            .await
            .sagas
            .get(saga_id.as_str())
            .cloned()
            .ok_or_else(|| SagaError::SagaNotFound(saga_id.clone()))
    }

    async fn update_saga_status(&self, saga_id: &SagaId, status: SagaStatus) -> Result<()> {
        let mut state = self.state.write().await;
        let saga = state
            .sagas
            .get_mut(saga_id.as_str())
            .ok_or_else(|| SagaError::SagaNotFound(saga_id.clone()))?;

        saga.status = status;
        saga.updated_at = Utc::now();
        if status == SagaStatus::Completed {
            saga.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn increment_retry_count(&self, saga_id: &SagaId) -> Result<()> {
        let mut state = self.state.write().await;
        let saga = state
            .sagas
            .get_mut(saga_id.as_str())
            .ok_or_else(|| SagaError::SagaNotFound(saga_id.clone()))?;
        saga.retry_count += 1;
        Ok(())
    }

    async fn log_event(
        &self,
        saga_id: &SagaId,
        event_id: &EventId,
        event_type: EventType,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.event_ids.insert(event_id.as_str().to_string()) {
            // Duplicate event id: the uniqueness guard fired, nothing to do.
            return Ok(());
        }
        state.event_log.push(EventLogEntry {
            saga_id: saga_id.clone(),
            event_id: event_id.clone(),
            event_type,
            status: "processed".to_string(),
            created_at: Utc::now(),
            processed_at: Some(Utc::now()),
            retry_count: 0,
            error: None,
        });
        Ok(())
    }

    async fn is_event_processed(&self, event_id: &EventId) -> Result<bool> {
        Ok(self
            .state
            .read()
            .await
            .event_ids
            .contains(event_id.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CompensationKind, Step};
    use crate::state::StepStatus;

    fn make_saga(id: &str) -> Saga {
        Saga::new(
            SagaId::new(id),
            "test",
            vec![
                Step::new(
                    "a",
                    "A",
                    "user-service",
                    "validate_user",
                    CompensationKind::None,
                    HashMap::new(),
                ),
                Step::new(
                    "b",
                    "B",
                    "report-service",
                    "generate_report",
                    CompensationKind::DeleteReport,
                    HashMap::new(),
                ),
            ],
        )
    }

    #[tokio::test]
    async fn save_then_get_roundtrips() {
        let store = InMemorySagaStateStore::new();
        let mut saga = make_saga("s-1");
        saga.data
            .insert("report_id".to_string(), serde_json::json!("5"));

        store.save_saga(&saga).await.unwrap();
        let loaded = store.get_saga(&saga.id).await.unwrap();

        assert_eq!(loaded.id, saga.id);
        assert_eq!(loaded.steps.len(), 2);
        assert_eq!(loaded.data.get("report_id"), Some(&serde_json::json!("5")));
    }

    #[tokio::test]
    async fn get_missing_saga_is_not_found() {
        let store = InMemorySagaStateStore::new();
        let result = store.get_saga(&SagaId::new("missing")).await;
        assert!(matches!(result, Err(SagaError::SagaNotFound(_))));
    }

    #[tokio::test]
    async fn save_caches_last_completed_step() {
        let store = InMemorySagaStateStore::new();
        let mut saga = make_saga("s-2");
        saga.steps[0].status = StepStatus::Completed;

        store.save_saga(&saga).await.unwrap();
        let loaded = store.get_saga(&saga.id).await.unwrap();
        assert_eq!(loaded.last_step_id.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn completed_status_stamps_completed_at() {
        let store = InMemorySagaStateStore::new();
        let saga = make_saga("s-3");
        store.save_saga(&saga).await.unwrap();

        store
            .update_saga_status(&saga.id, SagaStatus::Completed)
            .await
            .unwrap();
        let loaded = store.get_saga(&saga.id).await.unwrap();
        assert_eq!(loaded.status, SagaStatus::Completed);
        assert!(loaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn retry_count_survives_saves() {
        let store = InMemorySagaStateStore::new();
        let saga = make_saga("s-4");
        store.save_saga(&saga).await.unwrap();

        store.increment_retry_count(&saga.id).await.unwrap();
        store.save_saga(&saga).await.unwrap();

        let loaded = store.get_saga(&saga.id).await.unwrap();
        assert_eq!(loaded.retry_count, 1);
    }

    #[tokio::test]
    async fn duplicate_event_id_is_a_silent_no_op() {
        let store = InMemorySagaStateStore::new();
        let saga_id = SagaId::new("s-5");
        let event_id = EventId::new("evt-1");

        assert!(!store.is_event_processed(&event_id).await.unwrap());

        store
            .log_event(&saga_id, &event_id, EventType::SagaStarted)
            .await
            .unwrap();
        store
            .log_event(&saga_id, &event_id, EventType::SagaStarted)
            .await
            .unwrap();

        assert!(store.is_event_processed(&event_id).await.unwrap());
        assert_eq!(store.event_log().await.len(), 1);
    }
}
