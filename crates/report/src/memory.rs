use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{ReportId, UserId};
use tokio::sync::RwLock;

use crate::error::{ReportError, Result};
use crate::model::{NewReport, Report, ReportStatus, ReportUpdate};
use crate::store::{ReportPage, ReportStore};

#[derive(Default)]
struct State {
    reports: HashMap<i64, Report>,
    next_id: i64,
}

/// In-memory report store for tests and brokerless deployments.
#[derive(Clone, Default)]
pub struct InMemoryReportStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of stored reports.
    pub async fn count(&self) -> usize {
        self.state.read().await.reports.len()
    }

    async fn modify<F>(&self, id: ReportId, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Report),
    {
        let mut state = self.state.write().await;
        let report = state
            .reports
            .get_mut(&id.as_i64())
            .ok_or(ReportError::NotFound(id))?;
        apply(report);
        report.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl ReportStore for InMemoryReportStore {
    async fn insert(&self, user_id: UserId, report: NewReport) -> Result<Report> {
        let mut state = self.state.write().await;
        state.next_id += 1;
        let now = Utc::now();
        let stored = Report {
            id: ReportId::new(state.next_id),
            name: report.name,
            description: report.description,
            template_id: report.template_id,
            user_id,
            status: ReportStatus::Pending,
            parameters: report.parameters,
            file_path: None,
            file_size: None,
            md5_hash: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        state.reports.insert(stored.id.as_i64(), stored.clone());
        Ok(stored)
    }

    async fn get(&self, id: ReportId) -> Result<Option<Report>> {
        Ok(self.state.read().await.reports.get(&id.as_i64()).cloned())
    }

    async fn get_for_user(&self, id: ReportId, user_id: UserId) -> Result<Option<Report>> {
        Ok(self
            .state
            .read()
            .await
            .reports
            .get(&id.as_i64())
            .filter(|r| r.user_id == user_id)
            .cloned())
    }

    async fn list_for_user(
        &self,
        user_id: UserId,
        status: Option<ReportStatus>,
        page: i64,
        limit: i64,
    ) -> Result<ReportPage> {
        let state = self.state.read().await;
        let mut reports: Vec<_> = state
            .reports
            .values()
            .filter(|r| r.user_id == user_id)
            .filter(|r| status.is_none_or(|s| r.status == s))
            .cloned()
            .collect();
        reports.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.as_i64().cmp(&a.id.as_i64())));

        let total = reports.len() as i64;
        let offset = ((page - 1).max(0) * limit) as usize;
        let reports: Vec<_> = reports
            .into_iter()
            .skip(offset)
            .take(limit.max(0) as usize)
            .collect();

        Ok(ReportPage {
            reports,
            total,
            page,
            limit,
        })
    }

    async fn update(&self, id: ReportId, update: ReportUpdate) -> Result<()> {
        self.modify(id, |report| {
            if let Some(name) = update.name {
                report.name = name;
            }
            if let Some(description) = update.description {
                report.description = description;
            }
            if let Some(status) = update.status {
                report.status = status;
            }
            if let Some(parameters) = update.parameters {
                report.parameters = parameters;
            }
        })
        .await
    }

    async fn update_status(
        &self,
        id: ReportId,
        status: ReportStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let error = error.map(str::to_string);
        self.modify(id, |report| {
            report.status = status;
            report.error = error;
        })
        .await
    }

    async fn update_file_metadata(
        &self,
        id: ReportId,
        file_path: &str,
        file_size: i64,
        md5_hash: &str,
    ) -> Result<()> {
        let (path, hash) = (file_path.to_string(), md5_hash.to_string());
        self.modify(id, |report| {
            report.file_path = Some(path);
            report.file_size = Some(file_size);
            report.md5_hash = Some(hash);
        })
        .await
    }

    async fn clear_file_metadata(&self, id: ReportId) -> Result<()> {
        self.modify(id, |report| {
            report.file_path = None;
            report.file_size = None;
            report.md5_hash = None;
        })
        .await
    }

    async fn delete(&self, id: ReportId, user_id: UserId) -> Result<()> {
        let mut state = self.state.write().await;
        match state.reports.get(&id.as_i64()) {
            Some(report) if report.user_id == user_id => {
                state.reports.remove(&id.as_i64());
                Ok(())
            }
            _ => Err(ReportError::NotFound(id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::TemplateId;

    fn new_report(name: &str) -> NewReport {
        NewReport {
            name: name.to_string(),
            description: String::new(),
            template_id: TemplateId::new(1),
            parameters: "{}".to_string(),
        }
    }

    #[tokio::test]
    async fn insert_assigns_sequential_ids() {
        let store = InMemoryReportStore::new();
        let user = UserId::new(7);

        let first = store.insert(user, new_report("R1")).await.unwrap();
        let second = store.insert(user, new_report("R2")).await.unwrap();

        assert_eq!(first.id.as_i64(), 1);
        assert_eq!(second.id.as_i64(), 2);
        assert_eq!(first.status, ReportStatus::Pending);
    }

    #[tokio::test]
    async fn get_for_user_enforces_ownership() {
        let store = InMemoryReportStore::new();
        let owner = UserId::new(7);
        let stranger = UserId::new(8);

        let report = store.insert(owner, new_report("R1")).await.unwrap();

        assert!(store.get_for_user(report.id, owner).await.unwrap().is_some());
        assert!(
            store
                .get_for_user(report.id, stranger)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn list_filters_by_status_and_paginates() {
        let store = InMemoryReportStore::new();
        let user = UserId::new(7);

        for i in 0..5 {
            let report = store
                .insert(user, new_report(&format!("R{i}")))
                .await
                .unwrap();
            if i % 2 == 0 {
                store
                    .update_status(report.id, ReportStatus::Completed, None)
                    .await
                    .unwrap();
            }
        }

        let completed = store
            .list_for_user(user, Some(ReportStatus::Completed), 1, 10)
            .await
            .unwrap();
        assert_eq!(completed.total, 3);

        let page = store.list_for_user(user, None, 2, 2).await.unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.reports.len(), 2);
    }

    #[tokio::test]
    async fn file_metadata_lifecycle() {
        let store = InMemoryReportStore::new();
        let user = UserId::new(7);
        let report = store.insert(user, new_report("R1")).await.unwrap();

        store
            .update_file_metadata(report.id, "/reports/report_1.pdf", 1_048_576, "hash_1")
            .await
            .unwrap();
        let stored = store.get(report.id).await.unwrap().unwrap();
        assert_eq!(stored.file_path.as_deref(), Some("/reports/report_1.pdf"));
        assert_eq!(stored.file_size, Some(1_048_576));

        store.clear_file_metadata(report.id).await.unwrap();
        let cleared = store.get(report.id).await.unwrap().unwrap();
        assert!(cleared.file_path.is_none());
        assert!(cleared.md5_hash.is_none());
    }

    #[tokio::test]
    async fn delete_requires_ownership() {
        let store = InMemoryReportStore::new();
        let owner = UserId::new(7);
        let report = store.insert(owner, new_report("R1")).await.unwrap();

        let result = store.delete(report.id, UserId::new(8)).await;
        assert!(matches!(result, Err(ReportError::NotFound(_))));

        store.delete(report.id, owner).await.unwrap();
        assert_eq!(store.count().await, 0);
    }
}
