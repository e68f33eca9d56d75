//! Idempotent saga orchestration for report generation.
//!
//! This crate drives the multi-step report-creation workflow
//! (validate user → validate template → collect data → generate report →
//! store file → send notification → finalize) across peer services with
//! compensating actions on failure.
//!
//! The coordinator survives process restarts without replaying completed
//! work: saga state is persisted after every transition, completed steps
//! short-circuit on replay, and the event log's unique `event_id` guard
//! gives at-most-once handling of redelivered events.

pub mod coordinator;
pub mod error;
pub mod executor;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod report_creation;
pub mod state;
pub mod store;

pub use coordinator::{CoordinatorConfig, SagaCoordinator};
pub use error::SagaError;
pub use executor::{ExecutorError, StepExecutor};
pub use memory::InMemorySagaStateStore;
pub use model::{CompensationKind, Saga, SagaProgress, Step};
pub use postgres::PostgresSagaStateStore;
pub use report_creation::{ReportCreationParams, ReportStepExecutor, report_creation_saga};
pub use state::{SagaStatus, StepStatus};
pub use store::{EventLogEntry, SagaStateStore};
