//! Report CRUD and async-generation endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use common::{ReportId, SagaId, TemplateId};
use outbox::OutboxStore;
use report::{NewReport, Report, ReportStatus, ReportStore, ReportUpdate};
use saga::{ReportCreationParams, SagaStateStore, report_creation_saga};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::state::AppState;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateReportRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub template_id: i64,
    #[serde(default)]
    pub parameters: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateReportRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub parameters: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_page() -> i64 {
    1
}

fn default_limit() -> i64 {
    10
}

// -- Response types --

#[derive(Serialize)]
pub struct ReportCreatedResponse {
    pub id: i64,
    pub status: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct ReportResponse {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub template_id: i64,
    pub user_id: i64,
    pub status: String,
    pub parameters: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Report> for ReportResponse {
    fn from(report: Report) -> Self {
        Self {
            id: report.id.as_i64(),
            name: report.name,
            description: report.description,
            template_id: report.template_id.as_i64(),
            user_id: report.user_id.as_i64(),
            status: report.status.to_string(),
            parameters: report.parameters,
            file_path: report.file_path,
            file_size: report.file_size,
            md5_hash: report.md5_hash,
            error: report.error,
            created_at: report.created_at,
            updated_at: report.updated_at,
        }
    }
}

#[derive(Serialize)]
pub struct ReportStatusResponse {
    pub id: i64,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct ReportsResponse {
    pub reports: Vec<ReportResponse>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

// -- Handlers --

/// POST /api/v1/reports/ — create a report and enqueue its generation saga.
#[tracing::instrument(skip(state, req), fields(user_id = %user.0))]
pub async fn create<R, S, O>(
    State(state): State<Arc<AppState<R, S, O>>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateReportRequest>,
) -> Result<(StatusCode, Json<ReportCreatedResponse>), ApiError>
where
    R: ReportStore + Clone + 'static,
    S: SagaStateStore + 'static,
    O: OutboxStore + Clone + 'static,
{
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }
    if req.template_id <= 0 {
        return Err(ApiError::BadRequest("template_id is required".to_string()));
    }

    let parameters_raw = req.parameters.unwrap_or_else(|| "{}".to_string());
    let parameters: serde_json::Value = serde_json::from_str(&parameters_raw)
        .map_err(|err| ApiError::BadRequest(format!("parameters is not valid JSON: {err}")))?;

    let report = state
        .reports
        .create_report(
            user.0,
            NewReport {
                name: req.name.clone(),
                description: req.description.clone(),
                template_id: TemplateId::new(req.template_id),
                parameters: parameters_raw,
            },
        )
        .await?;

    let saga = report_creation_saga(
        SagaId::for_report(report.id),
        ReportCreationParams {
            report_id: Some(report.id),
            user_id: user.0,
            template_id: report.template_id,
            parameters: serde_json::json!({
                "name": req.name,
                "description": req.description,
                "parameters": parameters,
            }),
        },
    );

    // Fire the driver in the background; the client polls the status
    // endpoint. A saga that fails after retries surfaces on the report row.
    let coordinator = state.coordinator.clone();
    let reports = state.reports.clone();
    let report_id = report.id;
    tokio::spawn(async move {
        if let Err(err) = coordinator.run_saga(saga).await {
            tracing::error!(%report_id, error = %err, "report creation saga failed");
            if let Err(update_err) = reports
                .update_status(report_id, ReportStatus::Failed, Some(&err.to_string()))
                .await
            {
                tracing::error!(%report_id, error = %update_err, "failed to mark report failed");
            }
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(ReportCreatedResponse {
            id: report.id.as_i64(),
            status: ReportStatus::Pending.to_string(),
            message: "Отчет создан и поставлен в очередь на генерацию".to_string(),
        }),
    ))
}

/// GET /api/v1/reports/ — list the caller's reports.
#[tracing::instrument(skip(state), fields(user_id = %user.0))]
pub async fn list<R, S, O>(
    State(state): State<Arc<AppState<R, S, O>>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ReportsResponse>, ApiError>
where
    R: ReportStore + Clone + 'static,
    S: SagaStateStore + 'static,
    O: OutboxStore + Clone + 'static,
{
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(
            ReportStatus::parse(raw)
                .ok_or_else(|| ApiError::BadRequest(format!("invalid status '{raw}'")))?,
        ),
    };

    let page = state
        .reports
        .list_reports(user.0, status, query.page.max(1), query.limit.clamp(1, 100))
        .await?;

    Ok(Json(ReportsResponse {
        reports: page.reports.into_iter().map(ReportResponse::from).collect(),
        total: page.total,
        page: page.page,
        limit: page.limit,
    }))
}

/// GET /api/v1/reports/{id} — full report aggregate.
#[tracing::instrument(skip(state), fields(user_id = %user.0))]
pub async fn get<R, S, O>(
    State(state): State<Arc<AppState<R, S, O>>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<Json<ReportResponse>, ApiError>
where
    R: ReportStore + Clone + 'static,
    S: SagaStateStore + 'static,
    O: OutboxStore + Clone + 'static,
{
    let report = state.reports.get_report(ReportId::new(id), user.0).await?;
    Ok(Json(ReportResponse::from(report)))
}

/// GET /api/v1/reports/{id}/status — generation status and progress.
#[tracing::instrument(skip(state), fields(user_id = %user.0))]
pub async fn status<R, S, O>(
    State(state): State<Arc<AppState<R, S, O>>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<Json<ReportStatusResponse>, ApiError>
where
    R: ReportStore + Clone + 'static,
    S: SagaStateStore + 'static,
    O: OutboxStore + Clone + 'static,
{
    let report = state.reports.get_report(ReportId::new(id), user.0).await?;

    let progress = match report.status {
        ReportStatus::Pending | ReportStatus::Processing | ReportStatus::Completed => {
            Some(report.status.progress_percent())
        }
        _ => None,
    };
    let file_path = (report.status == ReportStatus::Completed)
        .then_some(report.file_path)
        .flatten();

    Ok(Json(ReportStatusResponse {
        id: report.id.as_i64(),
        status: report.status.to_string(),
        file_path,
        progress,
        error: report.error,
    }))
}

/// PUT /api/v1/reports/{id} — update an owned report.
#[tracing::instrument(skip(state, req), fields(user_id = %user.0))]
pub async fn update<R, S, O>(
    State(state): State<Arc<AppState<R, S, O>>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateReportRequest>,
) -> Result<Json<ReportResponse>, ApiError>
where
    R: ReportStore + Clone + 'static,
    S: SagaStateStore + 'static,
    O: OutboxStore + Clone + 'static,
{
    let status = match req.status.as_deref() {
        None => None,
        Some(raw) => Some(
            ReportStatus::parse(raw)
                .ok_or_else(|| ApiError::BadRequest(format!("invalid status '{raw}'")))?,
        ),
    };

    let report = state
        .reports
        .update_report(
            ReportId::new(id),
            user.0,
            ReportUpdate {
                name: req.name,
                description: req.description,
                status,
                parameters: req.parameters,
            },
        )
        .await?;

    Ok(Json(ReportResponse::from(report)))
}

/// DELETE /api/v1/reports/{id} — delete an owned report.
#[tracing::instrument(skip(state), fields(user_id = %user.0))]
pub async fn delete<R, S, O>(
    State(state): State<Arc<AppState<R, S, O>>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError>
where
    R: ReportStore + Clone + 'static,
    S: SagaStateStore + 'static,
    O: OutboxStore + Clone + 'static,
{
    state.reports.delete_report(ReportId::new(id), user.0).await?;
    Ok(Json(serde_json::json!({"message": "report deleted"})))
}

/// GET /api/v1/reports/{id}/download — file metadata for a completed report.
#[tracing::instrument(skip(state), fields(user_id = %user.0))]
pub async fn download<R, S, O>(
    State(state): State<Arc<AppState<R, S, O>>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError>
where
    R: ReportStore + Clone + 'static,
    S: SagaStateStore + 'static,
    O: OutboxStore + Clone + 'static,
{
    let report = state.reports.download_report(ReportId::new(id), user.0).await?;
    Ok(Json(serde_json::json!({
        "message": "report ready for download",
        "report": ReportResponse::from(report),
    })))
}

/// GET /api/v1/reports/{id}/export/csv — CSV serialization of the report row.
#[tracing::instrument(skip(state), fields(user_id = %user.0))]
pub async fn export_csv<R, S, O>(
    State(state): State<Arc<AppState<R, S, O>>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError>
where
    R: ReportStore + Clone + 'static,
    S: SagaStateStore + 'static,
    O: OutboxStore + Clone + 'static,
{
    let csv = state.reports.export_csv(ReportId::new(id), user.0).await?;

    let headers = [
        (axum::http::header::CONTENT_TYPE, "text/csv".to_string()),
        (
            axum::http::header::CONTENT_DISPOSITION,
            format!("attachment; filename=report_{id}.csv"),
        ),
    ];
    Ok((headers, csv))
}
