//! The external bus seam.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;

use crate::envelope::Event;

/// Errors that can occur while publishing to the bus.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The bus rejected or never received the message.
    #[error("transport error: {0}")]
    Transport(String),

    /// The event could not be serialized for the wire.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Publishes domain events to the external bus.
///
/// Wire contract: events go to a durable topic exchange, the routing key is
/// `event.type`, messages are persistent with content-type
/// `application/json`, and the body is the JSON-encoded [`Event`] envelope.
/// Consumers bind one queue per routing key and manually ack; a handler
/// error results in a negative-ack with requeue, so delivery is
/// at-least-once and consumers must dedupe on `event.id`.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes a single event. An `Ok` return means the bus accepted the
    /// message; it says nothing about consumer processing.
    async fn publish(&self, event: &Event) -> Result<(), PublishError>;
}

/// Publisher used when no bus is configured: logs the event and drops it.
///
/// The outbox still records every event, so a real publisher can be swapped
/// in later and failed rows requeued.
#[derive(Debug, Clone, Default)]
pub struct LocalEventPublisher;

impl LocalEventPublisher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventPublisher for LocalEventPublisher {
    async fn publish(&self, event: &Event) -> Result<(), PublishError> {
        tracing::info!(
            event_id = %event.id,
            routing_key = %event.event_type,
            source = %event.source,
            "publishing event locally (no bus configured)"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
struct RecordingState {
    events: Vec<Event>,
    fail_on_publish: bool,
}

/// In-memory publisher for tests: records every published event and can be
/// switched to fail.
#[derive(Debug, Clone, Default)]
pub struct RecordingEventPublisher {
    state: Arc<RwLock<RecordingState>>,
}

impl RecordingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the publisher to fail every publish call.
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.state.write().unwrap().fail_on_publish = fail;
    }

    /// Returns a snapshot of all published events.
    pub fn published(&self) -> Vec<Event> {
        self.state.read().unwrap().events.clone()
    }

    /// Returns how many events of the given type were published.
    pub fn count_of(&self, event_type: crate::EventType) -> usize {
        self.state
            .read()
            .unwrap()
            .events
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(&self, event: &Event) -> Result<(), PublishError> {
        let mut state = self.state.write().unwrap();
        if state.fail_on_publish {
            return Err(PublishError::Transport("bus unavailable".to_string()));
        }
        state.events.push(event.clone());
        Ok(())
    }
}
