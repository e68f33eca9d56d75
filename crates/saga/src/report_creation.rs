//! The canonical report-creation saga and its in-process step executor.

use std::collections::HashMap;

use async_trait::async_trait;
use common::{ReportId, SagaId, TemplateId, UserId};
use events::{Event, EventType, event_data};
use outbox::OutboxStore;
use report::{NewReport, ReportService, ReportStatus, ReportStore};

use crate::executor::{ExecutorError, StepExecutor};
use crate::model::{CompensationKind, Saga, Step};

/// Human label of the report-creation saga.
pub const SAGA_NAME: &str = "report-creation";

pub const STEP_VALIDATE_USER: &str = "validate-user";
pub const STEP_VALIDATE_TEMPLATE: &str = "validate-template";
pub const STEP_COLLECT_DATA: &str = "collect-data";
pub const STEP_GENERATE_REPORT: &str = "generate-report";
pub const STEP_STORE_FILE: &str = "store-file";
pub const STEP_SEND_NOTIFICATION: &str = "send-notification";
pub const STEP_UPDATE_STATUS: &str = "update-status";

/// Inputs for building a report-creation saga.
#[derive(Debug, Clone)]
pub struct ReportCreationParams {
    /// Known report ID when the row was created before the saga; `None` when
    /// the `generate-report` step is expected to create it.
    pub report_id: Option<ReportId>,
    pub user_id: UserId,
    pub template_id: TemplateId,
    pub parameters: serde_json::Value,
}

fn step_data(
    pairs: &[(&str, serde_json::Value)],
    report_id: Option<ReportId>,
) -> HashMap<String, serde_json::Value> {
    let mut data: HashMap<String, serde_json::Value> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    if let Some(report_id) = report_id {
        data.insert(
            "report_id".to_string(),
            serde_json::json!(report_id.to_string()),
        );
    }
    data
}

/// Builds the ordered report-creation saga.
///
/// Step identity, ordering and compensation kinds are the contract; data
/// keys are strings for wire compatibility with the peer services. When
/// `report_id` is not known up front, the `generate-report` step creates
/// the row and threads the ID to downstream steps through its output data.
pub fn report_creation_saga(saga_id: SagaId, params: ReportCreationParams) -> Saga {
    let user_id = serde_json::json!(params.user_id.to_string());
    let template_id = serde_json::json!(params.template_id.to_string());

    let steps = vec![
        Step::new(
            STEP_VALIDATE_USER,
            "Validate User",
            "user-service",
            "validate_user",
            CompensationKind::None,
            step_data(&[("user_id", user_id.clone())], None),
        ),
        Step::new(
            STEP_VALIDATE_TEMPLATE,
            "Validate Template",
            "template-service",
            "validate_template",
            CompensationKind::None,
            step_data(&[("template_id", template_id.clone())], None),
        ),
        Step::new(
            STEP_COLLECT_DATA,
            "Collect Data",
            "data-service",
            "collect_data",
            CompensationKind::None,
            step_data(
                &[
                    ("template_id", template_id.clone()),
                    ("parameters", params.parameters.clone()),
                ],
                None,
            ),
        ),
        Step::new(
            STEP_GENERATE_REPORT,
            "Generate Report",
            "report-service",
            "generate_report",
            CompensationKind::DeleteReport,
            step_data(
                &[
                    ("template_id", template_id),
                    ("user_id", user_id.clone()),
                    ("parameters", params.parameters),
                ],
                params.report_id,
            ),
        ),
        Step::new(
            STEP_STORE_FILE,
            "Store File",
            "storage-service",
            "store_file",
            CompensationKind::DeleteFile,
            step_data(
                &[
                    ("file_type", serde_json::json!("report")),
                    ("user_id", user_id.clone()),
                ],
                params.report_id,
            ),
        ),
        Step::new(
            STEP_SEND_NOTIFICATION,
            "Send Notification",
            "notification-service",
            "send_notification",
            CompensationKind::None,
            step_data(
                &[
                    ("user_id", user_id.clone()),
                    ("type", serde_json::json!("report_ready")),
                ],
                params.report_id,
            ),
        ),
        Step::new(
            STEP_UPDATE_STATUS,
            "Update Report Status",
            "report-service",
            "update_status",
            CompensationKind::None,
            step_data(
                &[("user_id", user_id), ("status", serde_json::json!("completed"))],
                params.report_id,
            ),
        ),
    ];

    Saga::new(saga_id, SAGA_NAME, steps)
}

/// In-process step executor for the report-creation saga.
///
/// Report-service actions mutate the report row; the storage and
/// notification actions are stubbed to their observable side effects (file
/// metadata on the row, a `report.completed` event in the outbox). External
/// validation steps succeed once their required inputs are present.
#[derive(Clone)]
pub struct ReportStepExecutor<R, O> {
    reports: ReportService<R>,
    outbox: O,
}

impl<R: ReportStore, O: OutboxStore> ReportStepExecutor<R, O> {
    pub fn new(reports: ReportService<R>, outbox: O) -> Self {
        Self { reports, outbox }
    }

    async fn generate_report(&self, step: &mut Step) -> Result<(), ExecutorError> {
        let template_id = parse_id(require_str(step, "template_id")?)?;
        let user_id = parse_id(require_str(step, "user_id")?)?;
        let parameters = step
            .data
            .get("parameters")
            .cloned()
            .ok_or_else(|| missing(step, "parameters"))?;

        let report_id = match step.data_str("report_id") {
            Some(raw) => {
                let id = ReportId::new(parse_id(raw)?);
                // The row exists; generation moves it to processing.
                self.reports.get_report_unchecked(id).await?;
                id
            }
            None => {
                let name = parameters
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Report")
                    .to_string();
                let report = self
                    .reports
                    .create_report(
                        UserId::new(user_id),
                        NewReport {
                            name,
                            description: "Created by the report-creation saga".to_string(),
                            template_id: TemplateId::new(template_id),
                            parameters: parameters.to_string(),
                        },
                    )
                    .await?;
                report.id
            }
        };

        self.reports
            .update_status(report_id, ReportStatus::Processing, None)
            .await?;

        // Output contract: downstream steps read report_id from step data.
        step.data.insert(
            "report_id".to_string(),
            serde_json::json!(report_id.to_string()),
        );

        tracing::info!(%report_id, "report generation started");
        Ok(())
    }

    async fn store_file(&self, step: &Step) -> Result<(), ExecutorError> {
        let report_id = ReportId::new(parse_id(require_str(step, "report_id")?)?);

        let file_path = format!("/reports/report_{report_id}.pdf");
        let file_size: i64 = 1024 * 1024;
        let md5_hash = format!("hash_{report_id}");

        self.reports
            .update_file_metadata(report_id, &file_path, file_size, &md5_hash)
            .await?;

        tracing::info!(%report_id, %file_path, "report file stored");
        Ok(())
    }

    async fn send_notification(&self, step: &Step) -> Result<(), ExecutorError> {
        let report_id = require_str(step, "report_id")?.to_string();
        let user_id = require_str(step, "user_id")?.to_string();

        let event = Event::new(
            EventType::ReportCompleted,
            "report-service",
            event_data! {
                "report_id" => report_id.clone(),
                "user_id" => user_id,
                "type" => "report_ready",
            },
        );
        self.outbox.save_event(&event).await?;

        tracing::info!(%report_id, "report.completed queued for notification-service");
        Ok(())
    }

    async fn update_status(&self, step: &Step) -> Result<(), ExecutorError> {
        let report_id = ReportId::new(parse_id(require_str(step, "report_id")?)?);
        let raw_status = step.data_str("status").unwrap_or("completed");
        let status = ReportStatus::parse(raw_status)
            .ok_or_else(|| ExecutorError::Permanent(format!("invalid status '{raw_status}'")))?;

        self.reports.update_status(report_id, status, None).await?;

        tracing::info!(%report_id, %status, "report status updated");
        Ok(())
    }

    fn require_external_input(step: &Step, key: &str) -> Result<(), ExecutorError> {
        // External services are stubbed; the contract is their input keys.
        require_str(step, key).map(|_| ())
    }
}

fn require_str<'a>(step: &'a Step, key: &str) -> Result<&'a str, ExecutorError> {
    step.data_str(key).ok_or_else(|| missing(step, key))
}

fn missing(step: &Step, key: &str) -> ExecutorError {
    ExecutorError::Permanent(format!("step '{}' is missing '{key}' in its data", step.id))
}

fn parse_id(raw: &str) -> Result<i64, ExecutorError> {
    raw.parse()
        .map_err(|_| ExecutorError::Permanent(format!("'{raw}' is not a valid id")))
}

#[async_trait]
impl<R: ReportStore, O: OutboxStore> StepExecutor for ReportStepExecutor<R, O> {
    async fn execute(&self, step: &mut Step) -> Result<(), ExecutorError> {
        match (step.service.as_str(), step.action.as_str()) {
            ("user-service", "validate_user") => Self::require_external_input(step, "user_id"),
            ("template-service", "validate_template") => {
                Self::require_external_input(step, "template_id")
            }
            ("data-service", "collect_data") => Self::require_external_input(step, "template_id"),
            ("report-service", "generate_report") => self.generate_report(step).await,
            ("storage-service", "store_file") => self.store_file(step).await,
            ("notification-service", "send_notification") => self.send_notification(step).await,
            ("report-service", "update_status") => self.update_status(step).await,
            (service, action) => Err(ExecutorError::Permanent(format!(
                "no executor for {service}.{action}"
            ))),
        }
    }

    async fn compensate(&self, step: &mut Step) -> Result<(), ExecutorError> {
        match step.compensate {
            CompensationKind::None => Ok(()),
            CompensationKind::DeleteReport => {
                let report_id = ReportId::new(parse_id(require_str(step, "report_id")?)?);
                self.reports
                    .update_status(report_id, ReportStatus::Failed, Some("report generation compensated"))
                    .await?;
                tracing::info!(%report_id, "report marked failed (compensation)");
                Ok(())
            }
            CompensationKind::DeleteFile => {
                let report_id = ReportId::new(parse_id(require_str(step, "report_id")?)?);
                self.reports.clear_file_metadata(report_id).await?;
                tracing::info!(%report_id, "report file metadata removed (compensation)");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outbox::InMemoryOutboxStore;
    use report::InMemoryReportStore;

    fn make_executor() -> (
        ReportStepExecutor<InMemoryReportStore, InMemoryOutboxStore>,
        ReportService<InMemoryReportStore>,
        InMemoryOutboxStore,
    ) {
        let store = InMemoryReportStore::new();
        let service = ReportService::new(store.clone());
        let outbox = InMemoryOutboxStore::new();
        (
            ReportStepExecutor::new(service.clone(), outbox.clone()),
            service,
            outbox,
        )
    }

    fn definition(report_id: Option<ReportId>) -> Saga {
        report_creation_saga(
            SagaId::generate(),
            ReportCreationParams {
                report_id,
                user_id: UserId::new(7),
                template_id: TemplateId::new(1),
                parameters: serde_json::json!({"name": "R1"}),
            },
        )
    }

    #[test]
    fn definition_has_seven_ordered_steps() {
        let saga = definition(Some(ReportId::new(5)));
        let ids: Vec<&str> = saga.steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                STEP_VALIDATE_USER,
                STEP_VALIDATE_TEMPLATE,
                STEP_COLLECT_DATA,
                STEP_GENERATE_REPORT,
                STEP_STORE_FILE,
                STEP_SEND_NOTIFICATION,
                STEP_UPDATE_STATUS,
            ]
        );
    }

    #[test]
    fn only_generate_and_store_compensate() {
        let saga = definition(Some(ReportId::new(5)));
        let kinds: Vec<CompensationKind> = saga.steps.iter().map(|s| s.compensate).collect();
        assert_eq!(
            kinds,
            vec![
                CompensationKind::None,
                CompensationKind::None,
                CompensationKind::None,
                CompensationKind::DeleteReport,
                CompensationKind::DeleteFile,
                CompensationKind::None,
                CompensationKind::None,
            ]
        );
    }

    #[tokio::test]
    async fn generate_report_writes_report_id_into_step_data() {
        let (executor, service, _) = make_executor();
        let report = service
            .create_report(
                UserId::new(7),
                NewReport {
                    name: "R1".to_string(),
                    description: String::new(),
                    template_id: TemplateId::new(1),
                    parameters: "{}".to_string(),
                },
            )
            .await
            .unwrap();

        let saga = definition(Some(report.id));
        let mut step = saga.step(STEP_GENERATE_REPORT).unwrap().clone();

        executor.execute(&mut step).await.unwrap();

        assert_eq!(step.data_str("report_id"), Some("1"));
        let stored = service.get_report_unchecked(report.id).await.unwrap();
        assert_eq!(stored.status, ReportStatus::Processing);
    }

    #[tokio::test]
    async fn generate_report_creates_the_row_when_missing() {
        let (executor, service, _) = make_executor();
        let saga = definition(None);
        let mut step = saga.step(STEP_GENERATE_REPORT).unwrap().clone();

        executor.execute(&mut step).await.unwrap();

        let report_id = ReportId::new(step.data_str("report_id").unwrap().parse().unwrap());
        let stored = service.get_report_unchecked(report_id).await.unwrap();
        assert_eq!(stored.name, "R1");
        assert_eq!(stored.status, ReportStatus::Processing);
    }

    #[tokio::test]
    async fn store_file_requires_report_id_from_step_data() {
        let (executor, _, _) = make_executor();
        let saga = definition(None);
        // No report_id threaded: the executor must refuse, not guess.
        let mut step = saga.step(STEP_STORE_FILE).unwrap().clone();

        let result = executor.execute(&mut step).await;
        assert!(matches!(result, Err(ExecutorError::Permanent(_))));
    }

    #[tokio::test]
    async fn store_file_records_file_metadata() {
        let (executor, service, _) = make_executor();
        let report = service
            .create_report(
                UserId::new(7),
                NewReport {
                    name: "R1".to_string(),
                    description: String::new(),
                    template_id: TemplateId::new(1),
                    parameters: "{}".to_string(),
                },
            )
            .await
            .unwrap();

        let saga = definition(Some(report.id));
        let mut step = saga.step(STEP_STORE_FILE).unwrap().clone();
        executor.execute(&mut step).await.unwrap();

        let stored = service.get_report_unchecked(report.id).await.unwrap();
        assert_eq!(stored.file_path.as_deref(), Some("/reports/report_1.pdf"));
        assert_eq!(stored.file_size, Some(1_048_576));
        assert_eq!(stored.md5_hash.as_deref(), Some("hash_1"));
    }

    #[tokio::test]
    async fn send_notification_queues_report_completed() {
        let (executor, _, outbox) = make_executor();
        let saga = definition(Some(ReportId::new(9)));
        let mut step = saga.step(STEP_SEND_NOTIFICATION).unwrap().clone();

        executor.execute(&mut step).await.unwrap();

        let queued = outbox.events_of_type(EventType::ReportCompleted).await;
        assert_eq!(queued.len(), 1);
        let envelope = queued[0].envelope().unwrap();
        assert_eq!(envelope.data_str("report_id"), Some("9"));
        assert_eq!(envelope.data_str("user_id"), Some("7"));
        assert_eq!(envelope.data_str("type"), Some("report_ready"));
    }

    #[tokio::test]
    async fn compensate_delete_report_marks_it_failed() {
        let (executor, service, _) = make_executor();
        let report = service
            .create_report(
                UserId::new(7),
                NewReport {
                    name: "R1".to_string(),
                    description: String::new(),
                    template_id: TemplateId::new(1),
                    parameters: "{}".to_string(),
                },
            )
            .await
            .unwrap();

        let saga = definition(Some(report.id));
        let mut step = saga.step(STEP_GENERATE_REPORT).unwrap().clone();
        executor.compensate(&mut step).await.unwrap();

        let stored = service.get_report_unchecked(report.id).await.unwrap();
        assert_eq!(stored.status, ReportStatus::Failed);
        assert!(stored.error.is_some());
    }

    #[tokio::test]
    async fn unknown_action_is_a_permanent_error() {
        let (executor, _, _) = make_executor();
        let mut step = Step::new(
            "mystery",
            "Mystery",
            "mystery-service",
            "do_things",
            CompensationKind::None,
            HashMap::new(),
        );

        let result = executor.execute(&mut step).await;
        assert!(matches!(result, Err(ExecutorError::Permanent(_))));
    }
}
