//! Typed identifiers shared across the report service crates.

pub mod types;

pub use types::{EventId, ReportId, SagaId, TemplateId, UserId};
