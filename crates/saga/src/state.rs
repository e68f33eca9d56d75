//! Saga and step state machines.

use serde::{Deserialize, Serialize};

/// The state of a saga in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Executing ──┬──► Completed
///                         └──► Failed ──► Executing (retry)
/// ```
/// `Completed` is terminal. A `Failed` saga whose completed steps have been
/// unwound keeps the `Failed` label (the steps themselves carry
/// `Compensated`); `Compensated` as a saga status is reached only through an
/// explicit administrative transition and is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SagaStatus {
    /// Created but not yet picked up by a driver.
    #[default]
    Pending,

    /// A driver is executing steps.
    Executing,

    /// Every step completed (terminal).
    Completed,

    /// A step exhausted its retries; eligible for retry or unwind.
    Failed,

    /// Unwound and closed administratively (terminal).
    Compensated,
}

impl SagaStatus {
    /// Returns true when the saga can never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaStatus::Completed | SagaStatus::Compensated)
    }

    /// Returns true if a retry is permitted from this status.
    pub fn can_retry(&self) -> bool {
        matches!(self, SagaStatus::Failed)
    }

    /// Returns the status name as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Pending => "pending",
            SagaStatus::Executing => "executing",
            SagaStatus::Completed => "completed",
            SagaStatus::Failed => "failed",
            SagaStatus::Compensated => "compensated",
        }
    }

    /// Parses a status from its database representation.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(SagaStatus::Pending),
            "executing" => Some(SagaStatus::Executing),
            "completed" => Some(SagaStatus::Completed),
            "failed" => Some(SagaStatus::Failed),
            "compensated" => Some(SagaStatus::Compensated),
            _ => None,
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The state of a single step.
///
/// `Executing → Completed | Failed`; `Failed` returns to `Pending` only via
/// an explicit saga-level retry; a `Completed` step moves to `Compensated`
/// when its compensation runs during an unwind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    #[default]
    Pending,
    Executing,
    Completed,
    Failed,
    Compensated,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Executing => "executing",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Compensated => "compensated",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_status_is_pending() {
        assert_eq!(SagaStatus::default(), SagaStatus::Pending);
        assert_eq!(StepStatus::default(), StepStatus::Pending);
    }

    #[test]
    fn terminal_states() {
        assert!(!SagaStatus::Pending.is_terminal());
        assert!(!SagaStatus::Executing.is_terminal());
        assert!(SagaStatus::Completed.is_terminal());
        assert!(!SagaStatus::Failed.is_terminal());
        assert!(SagaStatus::Compensated.is_terminal());
    }

    #[test]
    fn only_failed_can_retry() {
        assert!(SagaStatus::Failed.can_retry());
        assert!(!SagaStatus::Executing.can_retry());
        assert!(!SagaStatus::Completed.can_retry());
        assert!(!SagaStatus::Compensated.can_retry());
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&SagaStatus::Executing).unwrap(),
            "\"executing\""
        );
        assert_eq!(
            serde_json::to_string(&StepStatus::Compensated).unwrap(),
            "\"compensated\""
        );
    }

    #[test]
    fn parse_roundtrip() {
        for status in [
            SagaStatus::Pending,
            SagaStatus::Executing,
            SagaStatus::Completed,
            SagaStatus::Failed,
            SagaStatus::Compensated,
        ] {
            assert_eq!(SagaStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SagaStatus::parse("running"), None);
    }
}
