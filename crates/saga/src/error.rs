//! Saga error types.

use common::SagaId;
use thiserror::Error;

use crate::executor::ExecutorError;
use crate::state::SagaStatus;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The saga does not exist.
    #[error("saga not found: {0}")]
    SagaNotFound(SagaId),

    /// The step does not exist within the saga.
    #[error("step '{step}' not found in saga {saga}")]
    StepNotFound { saga: SagaId, step: String },

    /// The saga is already being driven.
    #[error("saga {0} is already executing")]
    AlreadyRunning(SagaId),

    /// The step is currently in flight in another driver.
    #[error("step '{step}' of saga {saga} is already executing")]
    StepBusy { saga: SagaId, step: String },

    /// The requested state change is not permitted.
    #[error("saga {saga}: expected status '{expected}', found '{actual}'")]
    InvalidTransition {
        saga: SagaId,
        expected: SagaStatus,
        actual: SagaStatus,
    },

    /// A step exhausted its attempts.
    #[error("step '{step}' failed after {attempts} attempt(s): {source}")]
    StepFailed {
        step: String,
        attempts: u32,
        source: ExecutorError,
    },

    /// A compensation exhausted its attempts; the unwind continues past it.
    #[error("compensation for step '{step}' failed after {attempts} attempt(s): {source}")]
    CompensationFailed {
        step: String,
        attempts: u32,
        source: ExecutorError,
    },

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A serialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The outbox rejected an append.
    #[error("outbox error: {0}")]
    Outbox(#[from] outbox::OutboxError),
}

/// Result type for saga operations.
pub type Result<T> = std::result::Result<T, SagaError>;
