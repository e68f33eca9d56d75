//! Report service entry point.

use std::sync::Arc;

use api::config::Config;
use api::jwt::JwtManager;
use api::middleware::AuthState;
use api::state::AppState;
use events::LocalEventPublisher;
use metrics_exporter_prometheus::PrometheusHandle;
use outbox::{OutboxPublisher, OutboxPublisherConfig, OutboxStore};
use report::ReportStore;
use saga::{CoordinatorConfig, SagaStateStore};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

async fn serve<R, S, O>(
    state: Arc<AppState<R, S, O>>,
    outbox_store: O,
    config: Config,
    metrics_handle: PrometheusHandle,
) where
    R: ReportStore + Clone + 'static,
    S: SagaStateStore + 'static,
    O: OutboxStore + Clone + 'static,
{
    // The bus seam: without a broker client the events are logged and kept
    // in the outbox for later requeue.
    match &config.bus_url {
        Some(url) => {
            tracing::warn!(bus_url = %url, "no broker client built in; publishing events locally");
        }
        None => tracing::info!("BUS_URL not set; publishing events locally"),
    }
    let bus = LocalEventPublisher::new();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let publisher = OutboxPublisher::new(
        outbox_store,
        bus,
        OutboxPublisherConfig::default(),
    );
    let publisher_handle = tokio::spawn(publisher.run(shutdown_rx));

    let auth = AuthState {
        jwt: Arc::new(JwtManager::new(&config.jwt_secret)),
    };
    let app = api::create_app(state, metrics_handle, auth);

    let addr = config.addr();
    tracing::info!(%addr, "starting report service");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // Drain the outbox publisher before exiting.
    let _ = shutdown_tx.send(true);
    let _ = publisher_handle.await;

    tracing::info!("report service shut down gracefully");
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    match config.database_url.clone() {
        Some(database_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.db_max_connections)
                .connect(&database_url)
                .await
                .expect("failed to connect to database");

            sqlx::migrate!("../../migrations")
                .run(&pool)
                .await
                .expect("failed to run migrations");

            let (state, outbox_store) =
                api::create_postgres_state(pool, CoordinatorConfig::default());
            serve(state, outbox_store, config, metrics_handle).await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory stores");
            let (state, outbox_store) =
                api::create_in_memory_state(CoordinatorConfig::default());
            serve(state, outbox_store, config, metrics_handle).await;
        }
    }
}
