use common::ReportId;
use thiserror::Error;

/// Errors that can occur in the report domain.
#[derive(Debug, Error)]
pub enum ReportError {
    /// The report does not exist (or belongs to another user).
    #[error("report not found: {0}")]
    NotFound(ReportId),

    /// The requested operation needs the report in a different status.
    #[error("report {id} is not ready: status is '{status}'")]
    NotReady { id: ReportId, status: String },

    /// A client supplied an unknown status value.
    #[error("invalid report status: '{0}'")]
    InvalidStatus(String),

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A serialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for report operations.
pub type Result<T> = std::result::Result<T, ReportError>;
