use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::EventId;
use serde::{Deserialize, Serialize};

/// All domain event types emitted by the report service.
///
/// The serialized form is the wire-level routing key, so the strings are
/// load-bearing and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "report.created")]
    ReportCreated,
    #[serde(rename = "report.updated")]
    ReportUpdated,
    #[serde(rename = "report.deleted")]
    ReportDeleted,
    #[serde(rename = "report.generated")]
    ReportGenerated,
    #[serde(rename = "report.completed")]
    ReportCompleted,
    #[serde(rename = "report.failed")]
    ReportFailed,

    #[serde(rename = "saga.started")]
    SagaStarted,
    #[serde(rename = "saga.completed")]
    SagaCompleted,
    #[serde(rename = "saga.failed")]
    SagaFailed,
    #[serde(rename = "saga.compensated")]
    SagaCompensated,

    #[serde(rename = "user.validated")]
    UserValidated,
    #[serde(rename = "user.validation_failed")]
    UserValidationFailed,
    #[serde(rename = "template.validated")]
    TemplateValidated,
    #[serde(rename = "template.validation_failed")]
    TemplateValidationFailed,
    #[serde(rename = "data.collected")]
    DataCollected,
    #[serde(rename = "data.collection_failed")]
    DataCollectionFailed,
    #[serde(rename = "file.stored")]
    FileStored,
    #[serde(rename = "file.storage_failed")]
    FileStorageFailed,
}

impl EventType {
    /// Returns the wire-level routing key for this event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ReportCreated => "report.created",
            EventType::ReportUpdated => "report.updated",
            EventType::ReportDeleted => "report.deleted",
            EventType::ReportGenerated => "report.generated",
            EventType::ReportCompleted => "report.completed",
            EventType::ReportFailed => "report.failed",
            EventType::SagaStarted => "saga.started",
            EventType::SagaCompleted => "saga.completed",
            EventType::SagaFailed => "saga.failed",
            EventType::SagaCompensated => "saga.compensated",
            EventType::UserValidated => "user.validated",
            EventType::UserValidationFailed => "user.validation_failed",
            EventType::TemplateValidated => "template.validated",
            EventType::TemplateValidationFailed => "template.validation_failed",
            EventType::DataCollected => "data.collected",
            EventType::DataCollectionFailed => "data.collection_failed",
            EventType::FileStored => "file.stored",
            EventType::FileStorageFailed => "file.storage_failed",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A domain event envelope.
///
/// This is both the wire format published to the bus and the payload stored
/// in the outbox table. Unknown metadata keys survive a decode/encode cycle
/// because metadata is an open map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier; also the idempotency key in the event log.
    pub id: EventId,

    /// The event type, used as the routing key on the bus.
    #[serde(rename = "type")]
    pub event_type: EventType,

    /// Name of the service that emitted the event.
    pub source: String,

    /// When the event was created.
    pub timestamp: DateTime<Utc>,

    /// Event payload.
    pub data: HashMap<String, serde_json::Value>,

    /// Additional context (correlation ids, tracing baggage, ...).
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Event {
    /// Creates a new event with a generated ID and the current timestamp.
    pub fn new(
        event_type: EventType,
        source: impl Into<String>,
        data: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: EventId::generate(),
            event_type,
            source: source.into(),
            timestamp: Utc::now(),
            data,
            metadata: HashMap::new(),
        }
    }

    /// Adds a metadata entry, returning the modified event.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Serializes the event to its wire representation.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes an event from its wire representation.
    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }

    /// Returns a string field from the event payload, if present.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }
}

/// Builds an event data map from `(key, value)` pairs.
#[macro_export]
macro_rules! event_data {
    ($($key:expr => $value:expr),* $(,)?) => {{
        let mut map = std::collections::HashMap::new();
        $(map.insert($key.to_string(), serde_json::json!($value));)*
        map
    }};
}
