//! The step execution capability.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::Step;

/// A step executor error, classified for the retry policy.
///
/// Executors classify their own failures: transient errors (I/O, downstream
/// timeouts, bus hiccups) are retried up to the coordinator's limit;
/// permanent errors (malformed step data, unknown actions) fail the step on
/// the first attempt.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Retry may cure this.
    #[error("{0}")]
    Transient(String),

    /// Retrying cannot help.
    #[error("{0}")]
    Permanent(String),
}

impl ExecutorError {
    /// Returns true when the coordinator should retry the attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExecutorError::Transient(_))
    }
}

impl From<report::ReportError> for ExecutorError {
    fn from(err: report::ReportError) -> Self {
        match err {
            report::ReportError::Database(_) => ExecutorError::Transient(err.to_string()),
            _ => ExecutorError::Permanent(err.to_string()),
        }
    }
}

impl From<outbox::OutboxError> for ExecutorError {
    fn from(err: outbox::OutboxError) -> Self {
        match err {
            outbox::OutboxError::Database(_) => ExecutorError::Transient(err.to_string()),
            _ => ExecutorError::Permanent(err.to_string()),
        }
    }
}

/// Performs a step's effect, or undoes it.
///
/// Implementations are keyed by `(step.service, step.action)`. A step may
/// write outputs into `step.data`; the coordinator persists them and makes
/// them visible to downstream steps.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Performs the step's work.
    async fn execute(&self, step: &mut Step) -> Result<(), ExecutorError>;

    /// Undoes a previously completed step.
    ///
    /// Never called for steps whose compensation kind is `none`.
    async fn compensate(&self, step: &mut Step) -> Result<(), ExecutorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ExecutorError::Transient("timeout".into()).is_transient());
        assert!(!ExecutorError::Permanent("bad payload".into()).is_transient());
    }

    #[test]
    fn report_errors_classify_by_recoverability() {
        let not_found = report::ReportError::NotFound(common::ReportId::new(1));
        assert!(!ExecutorError::from(not_found).is_transient());

        let db = report::ReportError::Database(sqlx::Error::PoolTimedOut);
        assert!(ExecutorError::from(db).is_transient());
    }
}
