use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use events::Event;
use tokio::sync::RwLock;

use crate::error::{OutboxError, Result};
use crate::model::{OutboxEvent, OutboxStatus};
use crate::store::OutboxStore;

/// In-memory outbox store for tests and brokerless deployments.
///
/// Provides the same interface as the PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemoryOutboxStore {
    events: Arc<RwLock<Vec<OutboxEvent>>>,
}

impl InMemoryOutboxStore {
    /// Creates a new empty in-memory outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of every row, regardless of status.
    pub async fn all(&self) -> Vec<OutboxEvent> {
        self.events.read().await.clone()
    }

    /// Returns the rows carrying the given event type.
    pub async fn events_of_type(&self, event_type: events::EventType) -> Vec<OutboxEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    async fn update<F>(&self, id: &str, apply: F) -> Result<()>
    where
        F: FnOnce(&mut OutboxEvent),
    {
        let mut events = self.events.write().await;
        let event = events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| OutboxError::NotFound(id.to_string()))?;
        apply(event);
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn save_event(&self, event: &Event) -> Result<()> {
        let row = OutboxEvent::from_envelope(event)?;
        self.events.write().await.push(row);
        Ok(())
    }

    async fn get_pending(&self, limit: usize) -> Result<Vec<OutboxEvent>> {
        let events = self.events.read().await;
        let mut pending: Vec<_> = events
            .iter()
            .filter(|e| e.status == OutboxStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_processing(&self, id: &str) -> Result<()> {
        self.update(id, |e| e.status = OutboxStatus::Processing).await
    }

    async fn mark_processed(&self, id: &str) -> Result<()> {
        self.update(id, |e| {
            e.status = OutboxStatus::Processed;
            e.processed_at = Some(Utc::now());
        })
        .await
    }

    async fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        let message = error.to_string();
        self.update(id, |e| {
            e.status = OutboxStatus::Failed;
            e.error = Some(message);
        })
        .await
    }

    async fn increment_retry_count(&self, id: &str) -> Result<()> {
        self.update(id, |e| e.retry_count += 1).await
    }

    async fn requeue_failed(&self, id: &str) -> Result<()> {
        let mut events = self.events.write().await;
        let event = events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| OutboxError::NotFound(id.to_string()))?;
        if event.status == OutboxStatus::Failed {
            event.status = OutboxStatus::Pending;
            event.error = None;
        }
        Ok(())
    }

    async fn release_stuck(&self, stuck_after: Duration) -> Result<u64> {
        let cutoff = Utc::now() - stuck_after;
        let mut events = self.events.write().await;
        let mut released = 0;
        for event in events.iter_mut() {
            if event.status == OutboxStatus::Processing && event.created_at < cutoff {
                event.status = OutboxStatus::Pending;
                released += 1;
            }
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use events::{EventType, event_data};
    use std::collections::HashMap;

    fn make_event(event_type: EventType) -> Event {
        Event::new(event_type, "report-service", HashMap::new())
    }

    #[tokio::test]
    async fn save_and_fetch_pending() {
        let store = InMemoryOutboxStore::new();
        store
            .save_event(&make_event(EventType::SagaStarted))
            .await
            .unwrap();
        store
            .save_event(&make_event(EventType::SagaCompleted))
            .await
            .unwrap();

        let pending = store.get_pending(10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending[0].created_at <= pending[1].created_at);
    }

    #[tokio::test]
    async fn get_pending_respects_limit() {
        let store = InMemoryOutboxStore::new();
        for _ in 0..5 {
            store
                .save_event(&make_event(EventType::ReportGenerated))
                .await
                .unwrap();
        }
        assert_eq!(store.get_pending(3).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn lifecycle_transitions() {
        let store = InMemoryOutboxStore::new();
        let event = make_event(EventType::ReportCompleted);
        store.save_event(&event).await.unwrap();
        let id = event.id.to_string();

        store.mark_processing(&id).await.unwrap();
        assert!(store.get_pending(10).await.unwrap().is_empty());

        store.mark_processed(&id).await.unwrap();
        let all = store.all().await;
        assert_eq!(all[0].status, OutboxStatus::Processed);
        assert!(all[0].processed_at.is_some());
    }

    #[tokio::test]
    async fn failed_rows_can_be_requeued() {
        let store = InMemoryOutboxStore::new();
        let event = make_event(EventType::SagaFailed);
        store.save_event(&event).await.unwrap();
        let id = event.id.to_string();

        store.mark_failed(&id, "bus down").await.unwrap();
        store.increment_retry_count(&id).await.unwrap();

        let all = store.all().await;
        assert_eq!(all[0].status, OutboxStatus::Failed);
        assert_eq!(all[0].retry_count, 1);
        assert_eq!(all[0].error.as_deref(), Some("bus down"));

        store.requeue_failed(&id).await.unwrap();
        assert_eq!(store.get_pending(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn release_stuck_reverts_old_processing_rows() {
        let store = InMemoryOutboxStore::new();
        let event = make_event(EventType::FileStored);
        store.save_event(&event).await.unwrap();
        store.mark_processing(&event.id.to_string()).await.unwrap();

        // A zero threshold makes every processing row "stuck".
        let released = store.release_stuck(Duration::zero()).await.unwrap();
        assert_eq!(released, 1);
        assert_eq!(store.get_pending(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let store = InMemoryOutboxStore::new();
        let result = store.mark_processed("missing").await;
        assert!(matches!(result, Err(OutboxError::NotFound(_))));
    }

    #[tokio::test]
    async fn aggregate_id_comes_from_payload() {
        let store = InMemoryOutboxStore::new();
        let event = Event::new(
            EventType::SagaStarted,
            "report-service",
            event_data! {"saga_id" => "report-creation-1"},
        );
        store.save_event(&event).await.unwrap();
        assert_eq!(store.all().await[0].aggregate_id, "report-creation-1");
    }
}
