use chrono::{DateTime, Utc};
use common::{ReportId, TemplateId, UserId};
use serde::{Deserialize, Serialize};

/// Client-visible lifecycle of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    /// Created, saga not yet picked up.
    Pending,
    /// Generation in progress.
    Processing,
    /// File generated and stored (terminal).
    Completed,
    /// Generation failed after retries (terminal).
    Failed,
    /// Explicitly cancelled (terminal).
    Cancelled,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Processing => "processing",
            ReportStatus::Completed => "completed",
            ReportStatus::Failed => "failed",
            ReportStatus::Cancelled => "cancelled",
        }
    }

    /// Parses a client-supplied status string.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(ReportStatus::Pending),
            "processing" => Some(ReportStatus::Processing),
            "completed" => Some(ReportStatus::Completed),
            "failed" => Some(ReportStatus::Failed),
            "cancelled" => Some(ReportStatus::Cancelled),
            _ => None,
        }
    }

    /// Progress percentage surfaced on the status endpoint.
    ///
    /// Monotonically non-decreasing across the pending → processing →
    /// completed path.
    pub fn progress_percent(&self) -> u8 {
        match self {
            ReportStatus::Pending => 0,
            ReportStatus::Processing => 50,
            ReportStatus::Completed => 100,
            ReportStatus::Failed | ReportStatus::Cancelled => 0,
        }
    }
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A report row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: ReportId,
    pub name: String,
    pub description: String,
    pub template_id: TemplateId,
    pub user_id: UserId,
    pub status: ReportStatus,
    /// Raw JSON string of the generation parameters, stored as supplied.
    pub parameters: String,
    pub file_path: Option<String>,
    pub file_size: Option<i64>,
    pub md5_hash: Option<String>,
    /// Failure detail when `status` is `failed`.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to create a report; the store assigns the ID.
#[derive(Debug, Clone)]
pub struct NewReport {
    pub name: String,
    pub description: String,
    pub template_id: TemplateId,
    pub parameters: String,
}

/// Partial update applied to an existing report.
#[derive(Debug, Clone, Default)]
pub struct ReportUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<ReportStatus>,
    pub parameters: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parse_roundtrip() {
        for status in [
            ReportStatus::Pending,
            ReportStatus::Processing,
            ReportStatus::Completed,
            ReportStatus::Failed,
            ReportStatus::Cancelled,
        ] {
            assert_eq!(ReportStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ReportStatus::parse("done"), None);
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&ReportStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
    }

    #[test]
    fn progress_is_monotonic_on_the_happy_path() {
        assert!(
            ReportStatus::Pending.progress_percent()
                <= ReportStatus::Processing.progress_percent()
        );
        assert!(
            ReportStatus::Processing.progress_percent()
                <= ReportStatus::Completed.progress_percent()
        );
    }
}
