//! HTTP surface for the report service.
//!
//! Provides the report CRUD endpoints (generation happens through the saga
//! in the background) and the saga admin endpoints, with JWT bearer auth,
//! structured logging and Prometheus metrics.

pub mod config;
pub mod error;
pub mod jwt;
pub mod middleware;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use outbox::{InMemoryOutboxStore, OutboxStore, PostgresOutboxStore};
use report::{InMemoryReportStore, PostgresReportStore, ReportService, ReportStore};
use saga::{
    CoordinatorConfig, InMemorySagaStateStore, PostgresSagaStateStore, ReportStepExecutor,
    SagaCoordinator, SagaStateStore,
};
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use middleware::AuthState;
use state::AppState;

/// Creates the axum application router with all routes and shared state.
pub fn create_app<R, S, O>(
    state: Arc<AppState<R, S, O>>,
    metrics_handle: PrometheusHandle,
    auth: AuthState,
) -> Router
where
    R: ReportStore + Clone + 'static,
    S: SagaStateStore + 'static,
    O: OutboxStore + Clone + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    let protected = Router::new()
        .route(
            "/api/v1/reports/",
            post(routes::reports::create::<R, S, O>).get(routes::reports::list::<R, S, O>),
        )
        .route(
            "/api/v1/reports/{id}",
            get(routes::reports::get::<R, S, O>)
                .put(routes::reports::update::<R, S, O>)
                .delete(routes::reports::delete::<R, S, O>),
        )
        .route(
            "/api/v1/reports/{id}/status",
            get(routes::reports::status::<R, S, O>),
        )
        .route(
            "/api/v1/reports/{id}/download",
            get(routes::reports::download::<R, S, O>),
        )
        .route(
            "/api/v1/reports/{id}/export/csv",
            get(routes::reports::export_csv::<R, S, O>),
        )
        .route("/api/v1/sagas/reports", post(routes::sagas::create::<R, S, O>))
        .route(
            "/api/v1/sagas/{id}",
            get(routes::sagas::get::<R, S, O>).delete(routes::sagas::cancel::<R, S, O>),
        )
        .route(
            "/api/v1/sagas/{id}/progress",
            get(routes::sagas::progress::<R, S, O>),
        )
        .route(
            "/api/v1/sagas/{id}/retry",
            post(routes::sagas::retry::<R, S, O>),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            auth,
            middleware::auth_middleware,
        ))
        .with_state(state.clone());

    // Operational recovery endpoint; deliberately outside the auth layer.
    let admin = Router::new()
        .route(
            "/api/v1/sagas/{id}/force-complete",
            post(routes::sagas::force_complete::<R, S, O>),
        )
        .with_state(state);

    Router::new()
        .route("/health", get(routes::health::check))
        .merge(metrics_router)
        .merge(protected)
        .merge(admin)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Application state backed by the in-memory stores.
pub type InMemoryAppState = AppState<InMemoryReportStore, InMemorySagaStateStore, InMemoryOutboxStore>;

/// Application state backed by PostgreSQL.
pub type PostgresAppState =
    AppState<PostgresReportStore, PostgresSagaStateStore, PostgresOutboxStore>;

/// Wires the in-memory stores into application state.
///
/// Returns the outbox store separately so the caller can attach the
/// background publisher to it.
pub fn create_in_memory_state(
    config: CoordinatorConfig,
) -> (Arc<InMemoryAppState>, InMemoryOutboxStore) {
    let reports = ReportService::new(InMemoryReportStore::new());
    let outbox_store = InMemoryOutboxStore::new();
    let saga_store = InMemorySagaStateStore::new();

    let executor = ReportStepExecutor::new(reports.clone(), outbox_store.clone());
    let coordinator = Arc::new(SagaCoordinator::with_config(
        saga_store,
        outbox_store.clone(),
        executor,
        config,
    ));

    (
        Arc::new(AppState {
            reports,
            coordinator,
        }),
        outbox_store,
    )
}

/// Wires the PostgreSQL stores into application state.
pub fn create_postgres_state(
    pool: PgPool,
    config: CoordinatorConfig,
) -> (Arc<PostgresAppState>, PostgresOutboxStore) {
    let reports = ReportService::new(PostgresReportStore::new(pool.clone()));
    let outbox_store = PostgresOutboxStore::new(pool.clone());
    let saga_store = PostgresSagaStateStore::new(pool);

    let executor = ReportStepExecutor::new(reports.clone(), outbox_store.clone());
    let coordinator = Arc::new(SagaCoordinator::with_config(
        saga_store,
        outbox_store.clone(),
        executor,
        config,
    ));

    (
        Arc::new(AppState {
            reports,
            coordinator,
        }),
        outbox_store,
    )
}
