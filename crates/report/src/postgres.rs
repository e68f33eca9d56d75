use async_trait::async_trait;
use chrono::Utc;
use common::{ReportId, TemplateId, UserId};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::error::{ReportError, Result};
use crate::model::{NewReport, Report, ReportStatus, ReportUpdate};
use crate::store::{ReportPage, ReportStore};

/// PostgreSQL-backed report store.
#[derive(Clone)]
pub struct PostgresReportStore {
    pool: PgPool,
}

impl PostgresReportStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_report(row: PgRow) -> Result<Report> {
        let status: String = row.try_get("status")?;

        Ok(Report {
            id: ReportId::new(row.try_get("id")?),
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            template_id: TemplateId::new(row.try_get("template_id")?),
            user_id: UserId::new(row.try_get("user_id")?),
            status: ReportStatus::parse(&status)
                .ok_or_else(|| ReportError::InvalidStatus(status.clone()))?,
            parameters: row.try_get("parameters")?,
            file_path: row.try_get("file_path")?,
            file_size: row.try_get("file_size")?,
            md5_hash: row.try_get("md5_hash")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn not_found(id: ReportId, result: sqlx::postgres::PgQueryResult) -> Result<()> {
        if result.rows_affected() == 0 {
            return Err(ReportError::NotFound(id));
        }
        Ok(())
    }
}

const REPORT_COLUMNS: &str = "id, name, description, template_id, user_id, status, parameters, \
                              file_path, file_size, md5_hash, error, created_at, updated_at";

#[async_trait]
impl ReportStore for PostgresReportStore {
    async fn insert(&self, user_id: UserId, report: NewReport) -> Result<Report> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO reports (name, description, template_id, user_id, status, parameters, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 'pending', $5, $6, $6)
            RETURNING {REPORT_COLUMNS}
            "#,
        ))
        .bind(&report.name)
        .bind(&report.description)
        .bind(report.template_id.as_i64())
        .bind(user_id.as_i64())
        .bind(&report.parameters)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_report(row)
    }

    async fn get(&self, id: ReportId) -> Result<Option<Report>> {
        let row = sqlx::query(&format!("SELECT {REPORT_COLUMNS} FROM reports WHERE id = $1"))
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_report).transpose()
    }

    async fn get_for_user(&self, id: ReportId, user_id: UserId) -> Result<Option<Report>> {
        let row = sqlx::query(&format!(
            "SELECT {REPORT_COLUMNS} FROM reports WHERE id = $1 AND user_id = $2"
        ))
        .bind(id.as_i64())
        .bind(user_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_report).transpose()
    }

    async fn list_for_user(
        &self,
        user_id: UserId,
        status: Option<ReportStatus>,
        page: i64,
        limit: i64,
    ) -> Result<ReportPage> {
        let status_filter = status.map(|s| s.as_str().to_string());
        let offset = (page - 1).max(0) * limit;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM reports WHERE user_id = $1 AND ($2::text IS NULL OR status = $2)",
        )
        .bind(user_id.as_i64())
        .bind(&status_filter)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {REPORT_COLUMNS} FROM reports
            WHERE user_id = $1 AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#,
        ))
        .bind(user_id.as_i64())
        .bind(&status_filter)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let reports = rows
            .into_iter()
            .map(Self::row_to_report)
            .collect::<Result<Vec<_>>>()?;

        Ok(ReportPage {
            reports,
            total,
            page,
            limit,
        })
    }

    async fn update(&self, id: ReportId, update: ReportUpdate) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE reports SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                status = COALESCE($4, status),
                parameters = COALESCE($5, parameters),
                updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .bind(update.name)
        .bind(update.description)
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.parameters)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Self::not_found(id, result)
    }

    async fn update_status(
        &self,
        id: ReportId,
        status: ReportStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE reports SET status = $2, error = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(id.as_i64())
        .bind(status.as_str())
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Self::not_found(id, result)
    }

    async fn update_file_metadata(
        &self,
        id: ReportId,
        file_path: &str,
        file_size: i64,
        md5_hash: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE reports SET file_path = $2, file_size = $3, md5_hash = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .bind(file_path)
        .bind(file_size)
        .bind(md5_hash)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Self::not_found(id, result)
    }

    async fn clear_file_metadata(&self, id: ReportId) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE reports SET file_path = NULL, file_size = NULL, md5_hash = NULL, updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Self::not_found(id, result)
    }

    async fn delete(&self, id: ReportId, user_id: UserId) -> Result<()> {
        let result = sqlx::query("DELETE FROM reports WHERE id = $1 AND user_id = $2")
            .bind(id.as_i64())
            .bind(user_id.as_i64())
            .execute(&self.pool)
            .await?;

        Self::not_found(id, result)
    }
}
