use async_trait::async_trait;
use common::{ReportId, UserId};

use crate::error::Result;
use crate::model::{NewReport, Report, ReportStatus, ReportUpdate};

/// One page of a user's reports.
#[derive(Debug, Clone)]
pub struct ReportPage {
    pub reports: Vec<Report>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

/// Persistence for report rows.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Inserts a new report in `pending` status and returns the stored row.
    async fn insert(&self, user_id: UserId, report: NewReport) -> Result<Report>;

    /// Loads a report by ID regardless of owner.
    async fn get(&self, id: ReportId) -> Result<Option<Report>>;

    /// Loads a report by ID scoped to its owner.
    async fn get_for_user(&self, id: ReportId, user_id: UserId) -> Result<Option<Report>>;

    /// Lists a user's reports newest-first, optionally filtered by status.
    async fn list_for_user(
        &self,
        user_id: UserId,
        status: Option<ReportStatus>,
        page: i64,
        limit: i64,
    ) -> Result<ReportPage>;

    /// Applies a partial update to the given fields.
    async fn update(&self, id: ReportId, update: ReportUpdate) -> Result<()>;

    /// Sets the status (and failure detail when present).
    async fn update_status(
        &self,
        id: ReportId,
        status: ReportStatus,
        error: Option<&str>,
    ) -> Result<()>;

    /// Records the stored file's location and checksum.
    async fn update_file_metadata(
        &self,
        id: ReportId,
        file_path: &str,
        file_size: i64,
        md5_hash: &str,
    ) -> Result<()>;

    /// Clears the stored file's location and checksum.
    async fn clear_file_metadata(&self, id: ReportId) -> Result<()>;

    /// Deletes a report owned by the given user.
    async fn delete(&self, id: ReportId, user_id: UserId) -> Result<()>;
}
