use chrono::{DateTime, Utc};
use events::{Event, EventType};
use serde::{Deserialize, Serialize};

/// Delivery lifecycle of an outbox row.
///
/// ```text
/// pending ──► processing ──► processed
///                  │
///                  └──► failed ──► pending (admin requeue)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    /// Written but not yet picked up by the publisher.
    Pending,
    /// Claimed by the publisher; publish in flight.
    Processing,
    /// Accepted by the bus (terminal).
    Processed,
    /// Publish failed; eligible for requeue.
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Processing => "processing",
            OutboxStatus::Processed => "processed",
            OutboxStatus::Failed => "failed",
        }
    }

    /// Parses a status from its database representation.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(OutboxStatus::Pending),
            "processing" => Some(OutboxStatus::Processing),
            "processed" => Some(OutboxStatus::Processed),
            "failed" => Some(OutboxStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A durable record of an event awaiting publication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    /// Row ID; equals the envelope's event ID so the bus message ID and the
    /// outbox row can be correlated.
    pub id: String,

    /// The event type, used as the routing key when publishing.
    pub event_type: EventType,

    /// Identity of the aggregate the event belongs to (saga or report ID).
    pub aggregate_id: String,

    /// The JSON-encoded [`Event`] envelope.
    pub payload: String,

    /// Current delivery status.
    pub status: OutboxStatus,

    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,

    /// Number of failed publish attempts.
    pub retry_count: i32,

    /// Last publish error, if any.
    pub error: Option<String>,
}

impl OutboxEvent {
    /// Wraps an envelope into a pending outbox row.
    ///
    /// The aggregate identity is taken from the payload (`saga_id`, falling
    /// back to `report_id`, falling back to the event ID for events that
    /// carry neither).
    pub fn from_envelope(event: &Event) -> Result<Self, serde_json::Error> {
        let aggregate_id = event
            .data_str("saga_id")
            .or_else(|| event.data_str("report_id"))
            .unwrap_or_else(|| event.id.as_str())
            .to_string();

        Ok(Self {
            id: event.id.to_string(),
            event_type: event.event_type,
            aggregate_id,
            payload: event.to_json()?,
            status: OutboxStatus::Pending,
            created_at: event.timestamp,
            processed_at: None,
            retry_count: 0,
            error: None,
        })
    }

    /// Decodes the stored envelope.
    pub fn envelope(&self) -> Result<Event, serde_json::Error> {
        Event::from_json(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use events::event_data;

    #[test]
    fn status_parse_roundtrip() {
        for status in [
            OutboxStatus::Pending,
            OutboxStatus::Processing,
            OutboxStatus::Processed,
            OutboxStatus::Failed,
        ] {
            assert_eq!(OutboxStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OutboxStatus::parse("bogus"), None);
    }

    #[test]
    fn from_envelope_prefers_saga_id_as_aggregate() {
        let event = Event::new(
            EventType::SagaStarted,
            "report-service",
            event_data! {"saga_id" => "report-creation-5", "report_id" => "5"},
        );
        let row = OutboxEvent::from_envelope(&event).unwrap();
        assert_eq!(row.aggregate_id, "report-creation-5");
        assert_eq!(row.status, OutboxStatus::Pending);
        assert_eq!(row.id, event.id.to_string());
    }

    #[test]
    fn from_envelope_falls_back_to_event_id() {
        let event = Event::new(
            EventType::ReportDeleted,
            "report-service",
            std::collections::HashMap::new(),
        );
        let row = OutboxEvent::from_envelope(&event).unwrap();
        assert_eq!(row.aggregate_id, event.id.to_string());
    }

    #[test]
    fn payload_roundtrips_to_the_original_envelope() {
        let event = Event::new(
            EventType::ReportCompleted,
            "report-service",
            event_data! {"report_id" => "9"},
        );
        let row = OutboxEvent::from_envelope(&event).unwrap();
        assert_eq!(row.envelope().unwrap(), event);
    }
}
