//! Shared application state.

use std::sync::Arc;

use outbox::OutboxStore;
use report::{ReportService, ReportStore};
use saga::{ReportStepExecutor, SagaCoordinator, SagaStateStore};

/// Shared state accessible from all handlers.
///
/// Generic over the three store implementations so the same surface runs
/// against PostgreSQL in production and the in-memory stores in tests.
pub struct AppState<R: ReportStore, S: SagaStateStore, O: OutboxStore> {
    pub reports: ReportService<R>,
    pub coordinator: Arc<SagaCoordinator<S, O, ReportStepExecutor<R, O>>>,
}
