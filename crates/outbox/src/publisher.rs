use std::time::Duration;

use events::EventPublisher;
use tokio::sync::watch;

use crate::model::OutboxEvent;
use crate::store::OutboxStore;

/// Configuration for the outbox publisher loop.
#[derive(Debug, Clone)]
pub struct OutboxPublisherConfig {
    /// How often the loop polls for pending events.
    pub interval: Duration,
    /// Maximum number of events drained per tick.
    pub batch_size: usize,
    /// How long a row may sit in `processing` before it is considered
    /// abandoned and released back to `pending`.
    pub stuck_after: Duration,
}

impl Default for OutboxPublisherConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            batch_size: 10,
            stuck_after: Duration::from_secs(60),
        }
    }
}

/// Background worker that drains pending outbox rows to the bus.
///
/// Within one batch, events are published in `created_at` order; across
/// batches no global order is promised.
pub struct OutboxPublisher<S, P> {
    store: S,
    publisher: P,
    config: OutboxPublisherConfig,
}

impl<S, P> OutboxPublisher<S, P>
where
    S: OutboxStore,
    P: EventPublisher,
{
    pub fn new(store: S, publisher: P, config: OutboxPublisherConfig) -> Self {
        Self {
            store,
            publisher,
            config,
        }
    }

    /// Runs the publish loop until the shutdown channel fires.
    ///
    /// Every tick publishes one batch and releases stuck `processing` rows.
    /// Store errors are logged and the loop keeps ticking; a dead loop would
    /// silently stop all event delivery.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            batch_size = self.config.batch_size,
            "outbox publisher started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!("outbox publisher shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    self.publish_pending().await;
                    self.sweep_stuck().await;
                }
            }
        }
    }

    /// Publishes one batch of pending events.
    pub async fn publish_pending(&self) {
        let batch = match self.store.get_pending(self.config.batch_size).await {
            Ok(batch) => batch,
            Err(err) => {
                tracing::error!(error = %err, "failed to fetch pending outbox events");
                return;
            }
        };

        if batch.is_empty() {
            return;
        }

        tracing::debug!(count = batch.len(), "publishing pending outbox events");

        for event in batch {
            self.publish_one(event).await;
        }
    }

    async fn publish_one(&self, row: OutboxEvent) {
        if let Err(err) = self.store.mark_processing(&row.id).await {
            tracing::error!(outbox_id = %row.id, error = %err, "failed to claim outbox event");
            return;
        }

        let envelope = match row.envelope() {
            Ok(envelope) => envelope,
            Err(err) => {
                // Malformed payloads never become publishable; park as failed.
                tracing::error!(outbox_id = %row.id, error = %err, "undecodable outbox payload");
                let _ = self
                    .store
                    .mark_failed(&row.id, &format!("payload decode: {err}"))
                    .await;
                return;
            }
        };

        match self.publisher.publish(&envelope).await {
            Ok(()) => {
                metrics::counter!("outbox_events_published_total").increment(1);
                if let Err(err) = self.store.mark_processed(&row.id).await {
                    tracing::error!(outbox_id = %row.id, error = %err, "failed to mark outbox event processed");
                }
            }
            Err(err) => {
                metrics::counter!("outbox_publish_failures_total").increment(1);
                tracing::warn!(
                    outbox_id = %row.id,
                    routing_key = %row.event_type,
                    error = %err,
                    "outbox publish failed"
                );
                let _ = self.store.increment_retry_count(&row.id).await;
                let _ = self.store.mark_failed(&row.id, &err.to_string()).await;
            }
        }
    }

    async fn sweep_stuck(&self) {
        let stuck_after = match chrono::Duration::from_std(self.config.stuck_after) {
            Ok(duration) => duration,
            Err(_) => return,
        };
        match self.store.release_stuck(stuck_after).await {
            Ok(0) => {}
            Ok(released) => {
                tracing::warn!(released, "released stuck outbox events back to pending");
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to release stuck outbox events");
            }
        }
    }
}
