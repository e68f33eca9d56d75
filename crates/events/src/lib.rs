//! Domain event model and the external bus seam.
//!
//! Every state change the report service wants the outside world to see is
//! expressed as an [`Event`] envelope and published through the
//! [`EventPublisher`] trait. The envelope is the wire format: routing key is
//! the event type, payload is the JSON-encoded envelope.

pub mod envelope;
pub mod publisher;

pub use common::EventId;
pub use envelope::{Event, EventType};
pub use publisher::{EventPublisher, LocalEventPublisher, PublishError, RecordingEventPublisher};
