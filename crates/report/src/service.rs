use common::{ReportId, UserId};

use crate::error::{ReportError, Result};
use crate::model::{NewReport, Report, ReportStatus, ReportUpdate};
use crate::store::{ReportPage, ReportStore};

/// Application service over a [`ReportStore`].
///
/// The saga touches the report row only through [`update_status`] and
/// [`update_file_metadata`]; the rest serves the HTTP surface.
///
/// [`update_status`]: ReportService::update_status
/// [`update_file_metadata`]: ReportService::update_file_metadata
#[derive(Clone)]
pub struct ReportService<S> {
    store: S,
}

impl<S: ReportStore> ReportService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Creates a report in `pending` status.
    #[tracing::instrument(skip(self, report), fields(name = %report.name))]
    pub async fn create_report(&self, user_id: UserId, report: NewReport) -> Result<Report> {
        let report = self.store.insert(user_id, report).await?;
        tracing::info!(report_id = %report.id, "report created");
        Ok(report)
    }

    /// Loads a report owned by the given user.
    pub async fn get_report(&self, id: ReportId, user_id: UserId) -> Result<Report> {
        self.store
            .get_for_user(id, user_id)
            .await?
            .ok_or(ReportError::NotFound(id))
    }

    /// Loads a report regardless of owner (saga-internal path).
    pub async fn get_report_unchecked(&self, id: ReportId) -> Result<Report> {
        self.store.get(id).await?.ok_or(ReportError::NotFound(id))
    }

    /// Lists a user's reports newest-first.
    pub async fn list_reports(
        &self,
        user_id: UserId,
        status: Option<ReportStatus>,
        page: i64,
        limit: i64,
    ) -> Result<ReportPage> {
        self.store.list_for_user(user_id, status, page, limit).await
    }

    /// Applies a client-supplied update to an owned report.
    pub async fn update_report(
        &self,
        id: ReportId,
        user_id: UserId,
        update: ReportUpdate,
    ) -> Result<Report> {
        // Ownership check before touching the row.
        self.get_report(id, user_id).await?;
        self.store.update(id, update).await?;
        self.get_report(id, user_id).await
    }

    /// Deletes an owned report.
    pub async fn delete_report(&self, id: ReportId, user_id: UserId) -> Result<()> {
        self.store.delete(id, user_id).await
    }

    /// Sets the report status. Saga-facing surface.
    pub async fn update_status(
        &self,
        id: ReportId,
        status: ReportStatus,
        error: Option<&str>,
    ) -> Result<()> {
        self.store.update_status(id, status, error).await
    }

    /// Records the generated file's metadata. Saga-facing surface.
    pub async fn update_file_metadata(
        &self,
        id: ReportId,
        file_path: &str,
        file_size: i64,
        md5_hash: &str,
    ) -> Result<()> {
        self.store
            .update_file_metadata(id, file_path, file_size, md5_hash)
            .await
    }

    /// Removes the stored file's metadata. Saga compensation surface.
    pub async fn clear_file_metadata(&self, id: ReportId) -> Result<()> {
        self.store.clear_file_metadata(id).await
    }

    /// Returns the report for download; only completed reports have a file.
    pub async fn download_report(&self, id: ReportId, user_id: UserId) -> Result<Report> {
        let report = self.get_report(id, user_id).await?;
        if report.status != ReportStatus::Completed || report.file_path.is_none() {
            return Err(ReportError::NotReady {
                id,
                status: report.status.to_string(),
            });
        }
        Ok(report)
    }

    /// Serializes the report row as a two-line CSV document.
    pub async fn export_csv(&self, id: ReportId, user_id: UserId) -> Result<String> {
        let report = self.get_report(id, user_id).await?;

        let header = "id,name,description,template_id,user_id,status,parameters,file_path,file_size,md5_hash,created_at,updated_at";
        let fields = [
            report.id.to_string(),
            report.name,
            report.description,
            report.template_id.to_string(),
            report.user_id.to_string(),
            report.status.to_string(),
            report.parameters,
            report.file_path.unwrap_or_default(),
            report.file_size.map(|s| s.to_string()).unwrap_or_default(),
            report.md5_hash.unwrap_or_default(),
            report.created_at.to_rfc3339(),
            report.updated_at.to_rfc3339(),
        ];
        let row: Vec<String> = fields.iter().map(|f| csv_escape(f)).collect();

        Ok(format!("{header}\n{}\n", row.join(",")))
    }
}

/// Quotes a CSV field when it contains a delimiter, quote or newline.
fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryReportStore;
    use common::TemplateId;

    fn service() -> ReportService<InMemoryReportStore> {
        ReportService::new(InMemoryReportStore::new())
    }

    fn new_report(name: &str) -> NewReport {
        NewReport {
            name: name.to_string(),
            description: "quarterly numbers".to_string(),
            template_id: TemplateId::new(1),
            parameters: "{}".to_string(),
        }
    }

    #[tokio::test]
    async fn create_starts_pending() {
        let service = service();
        let report = service
            .create_report(UserId::new(7), new_report("R1"))
            .await
            .unwrap();
        assert_eq!(report.status, ReportStatus::Pending);
    }

    #[tokio::test]
    async fn download_requires_completed_with_file() {
        let service = service();
        let user = UserId::new(7);
        let report = service.create_report(user, new_report("R1")).await.unwrap();

        let result = service.download_report(report.id, user).await;
        assert!(matches!(result, Err(ReportError::NotReady { .. })));

        service
            .update_status(report.id, ReportStatus::Completed, None)
            .await
            .unwrap();
        service
            .update_file_metadata(report.id, "/reports/report_1.pdf", 1_048_576, "hash_1")
            .await
            .unwrap();

        let ready = service.download_report(report.id, user).await.unwrap();
        assert_eq!(ready.file_path.as_deref(), Some("/reports/report_1.pdf"));
    }

    #[tokio::test]
    async fn update_report_checks_ownership() {
        let service = service();
        let report = service
            .create_report(UserId::new(7), new_report("R1"))
            .await
            .unwrap();

        let result = service
            .update_report(
                report.id,
                UserId::new(8),
                ReportUpdate {
                    name: Some("hijacked".to_string()),
                    ..ReportUpdate::default()
                },
            )
            .await;
        assert!(matches!(result, Err(ReportError::NotFound(_))));
    }

    #[tokio::test]
    async fn export_csv_quotes_awkward_fields() {
        let service = service();
        let user = UserId::new(7);
        let mut report = new_report("R1");
        report.description = "has, comma and \"quotes\"".to_string();
        let stored = service.create_report(user, report).await.unwrap();

        let csv = service.export_csv(stored.id, user).await.unwrap();
        let mut lines = csv.lines();
        let header = lines.next().unwrap();
        let row = lines.next().unwrap();

        assert!(header.starts_with("id,name,description"));
        assert!(row.contains("\"has, comma and \"\"quotes\"\"\""));
    }

    #[test]
    fn csv_escape_passes_plain_fields_through() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
