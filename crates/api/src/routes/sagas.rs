//! Saga admin endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{SagaId, TemplateId};
use outbox::OutboxStore;
use report::ReportStore;
use saga::{
    ReportCreationParams, Saga, SagaProgress, SagaStateStore, SagaStatus, Step,
    report_creation_saga,
};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::state::AppState;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateReportSagaRequest {
    pub template_id: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

// -- Response types --

#[derive(Serialize)]
pub struct SagaStartedResponse {
    pub saga_id: String,
    pub status: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct SagaResponse {
    pub saga_id: String,
    pub name: String,
    pub status: SagaStatus,
    pub steps: Vec<Step>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retry_count: i32,
}

impl From<Saga> for SagaResponse {
    fn from(saga: Saga) -> Self {
        Self {
            saga_id: saga.id.to_string(),
            name: saga.name,
            status: saga.status,
            steps: saga.steps,
            created_at: saga.created_at,
            updated_at: saga.updated_at,
            completed_at: saga.completed_at,
            error: saga.last_error,
            retry_count: saga.retry_count,
        }
    }
}

#[derive(Serialize)]
pub struct SagaActionResponse {
    pub saga_id: String,
    pub status: String,
    pub message: String,
}

// -- Handlers --

/// POST /api/v1/sagas/reports — explicitly start a report-creation saga.
///
/// Unlike the report endpoint, no report row exists yet; the
/// `generate-report` step creates it and threads the ID downstream.
#[tracing::instrument(skip(state, req), fields(user_id = %user.0))]
pub async fn create<R, S, O>(
    State(state): State<Arc<AppState<R, S, O>>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateReportSagaRequest>,
) -> Result<(StatusCode, Json<SagaStartedResponse>), ApiError>
where
    R: ReportStore + Clone + 'static,
    S: SagaStateStore + 'static,
    O: OutboxStore + Clone + 'static,
{
    let template_id: i64 = req
        .template_id
        .parse()
        .map_err(|_| ApiError::BadRequest("invalid template_id".to_string()))?;

    let saga = report_creation_saga(
        SagaId::generate(),
        ReportCreationParams {
            report_id: None,
            user_id: user.0,
            template_id: TemplateId::new(template_id),
            parameters: req.parameters,
        },
    );
    let saga_id = saga.id.clone();

    let coordinator = state.coordinator.clone();
    let spawned = saga_id.clone();
    tokio::spawn(async move {
        if let Err(err) = coordinator.run_saga(saga).await {
            tracing::error!(saga_id = %spawned, error = %err, "report saga failed");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(SagaStartedResponse {
            saga_id: saga_id.to_string(),
            status: "started".to_string(),
            message: "report creation saga started".to_string(),
        }),
    ))
}

/// GET /api/v1/sagas/{id} — saga aggregate.
#[tracing::instrument(skip(state), fields(user_id = %user.0))]
pub async fn get<R, S, O>(
    State(state): State<Arc<AppState<R, S, O>>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<SagaResponse>, ApiError>
where
    R: ReportStore + Clone + 'static,
    S: SagaStateStore + 'static,
    O: OutboxStore + Clone + 'static,
{
    let saga = state.coordinator.get_saga(&SagaId::new(id)).await?;
    Ok(Json(SagaResponse::from(saga)))
}

/// GET /api/v1/sagas/{id}/progress — counts by step status and a percentage.
#[tracing::instrument(skip(state), fields(user_id = %user.0))]
pub async fn progress<R, S, O>(
    State(state): State<Arc<AppState<R, S, O>>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<SagaProgress>, ApiError>
where
    R: ReportStore + Clone + 'static,
    S: SagaStateStore + 'static,
    O: OutboxStore + Clone + 'static,
{
    let saga = state.coordinator.get_saga(&SagaId::new(id)).await?;
    Ok(Json(saga.progress()))
}

/// POST /api/v1/sagas/{id}/retry — re-drive a failed saga.
#[tracing::instrument(skip(state), fields(user_id = %user.0))]
pub async fn retry<R, S, O>(
    State(state): State<Arc<AppState<R, S, O>>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<SagaActionResponse>), ApiError>
where
    R: ReportStore + Clone + 'static,
    S: SagaStateStore + 'static,
    O: OutboxStore + Clone + 'static,
{
    let saga_id = SagaId::new(id);
    let saga = state.coordinator.get_saga(&saga_id).await?;
    if !saga.status.can_retry() {
        return Err(ApiError::Saga(saga::SagaError::InvalidTransition {
            saga: saga_id,
            expected: SagaStatus::Failed,
            actual: saga.status,
        }));
    }

    let coordinator = state.coordinator.clone();
    let retried = saga_id.clone();
    tokio::spawn(async move {
        if let Err(err) = coordinator.retry_failed_saga(&retried).await {
            tracing::error!(saga_id = %retried, error = %err, "saga retry failed");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(SagaActionResponse {
            saga_id: saga_id.to_string(),
            status: "retrying".to_string(),
            message: "saga retry started".to_string(),
        }),
    ))
}

/// DELETE /api/v1/sagas/{id} — cancel: mark the saga failed so compensation
/// can run.
#[tracing::instrument(skip(state), fields(user_id = %user.0))]
pub async fn cancel<R, S, O>(
    State(state): State<Arc<AppState<R, S, O>>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<SagaActionResponse>, ApiError>
where
    R: ReportStore + Clone + 'static,
    S: SagaStateStore + 'static,
    O: OutboxStore + Clone + 'static,
{
    let saga_id = SagaId::new(id);
    let saga = state.coordinator.get_saga(&saga_id).await?;
    if saga.status.is_terminal() {
        return Err(ApiError::BadRequest(format!(
            "saga {saga_id} is already {}",
            saga.status
        )));
    }

    state
        .coordinator
        .update_saga_status(&saga_id, SagaStatus::Failed)
        .await?;

    Ok(Json(SagaActionResponse {
        saga_id: saga_id.to_string(),
        status: "cancelled".to_string(),
        message: "saga cancelled".to_string(),
    }))
}

/// POST /api/v1/sagas/{id}/force-complete — administrative terminal override.
///
/// Mounted outside the auth layer; any failure maps to 500.
#[tracing::instrument(skip(state))]
pub async fn force_complete<R, S, O>(
    State(state): State<Arc<AppState<R, S, O>>>,
    Path(id): Path<String>,
) -> Result<Json<SagaActionResponse>, ApiError>
where
    R: ReportStore + Clone + 'static,
    S: SagaStateStore + 'static,
    O: OutboxStore + Clone + 'static,
{
    let saga_id = SagaId::new(id);
    state
        .coordinator
        .force_complete_saga(&saga_id)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    Ok(Json(SagaActionResponse {
        saga_id: saga_id.to_string(),
        status: "completed".to_string(),
        message: "saga force-completed".to_string(),
    }))
}
