//! The saga aggregate and its steps.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::SagaId;
use serde::{Deserialize, Serialize};

use crate::state::{SagaStatus, StepStatus};

/// How a completed step is undone during an unwind.
///
/// The serialized form is part of the persisted step encoding; `None`
/// serializes as the `"none"` sentinel and marks a non-compensating step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompensationKind {
    /// The step has no undo; it is skipped during compensation.
    #[default]
    None,
    /// Mark the generated report as failed.
    DeleteReport,
    /// Remove the stored file's metadata.
    DeleteFile,
}

impl CompensationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompensationKind::None => "none",
            CompensationKind::DeleteReport => "delete_report",
            CompensationKind::DeleteFile => "delete_file",
        }
    }
}

impl std::fmt::Display for CompensationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single step of a saga.
///
/// `service` and `action` are the executor dispatch keys; `data` is the
/// step's input/output mapping. Unknown fields encountered when decoding a
/// persisted step are kept in `extra` and written back on encode, so rows
/// written by a newer build survive a round-trip through an older one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub name: String,
    pub service: String,
    pub action: String,
    pub compensate: CompensationKind,
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Step {
    /// Creates a pending step.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        service: impl Into<String>,
        action: impl Into<String>,
        compensate: CompensationKind,
        data: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            service: service.into(),
            action: action.into(),
            compensate,
            data,
            status: StepStatus::Pending,
            error: None,
            executed_at: None,
            completed_at: None,
            extra: HashMap::new(),
        }
    }

    /// Clears execution traces so the step can run again.
    pub fn reset_for_retry(&mut self) {
        self.status = StepStatus::Pending;
        self.error = None;
        self.executed_at = None;
        self.completed_at = None;
    }

    /// Returns a string field from the step data, if present.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }
}

/// A saga aggregate: an ordered sequence of steps plus shared scratch data.
///
/// The persisted row is the single source of truth; in-memory copies are
/// snapshots that the coordinator re-reads before every step and fully
/// re-writes after every transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Saga {
    pub id: SagaId,
    pub name: String,
    pub status: SagaStatus,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub retry_count: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_step_id: Option<String>,
}

impl Saga {
    /// Creates a pending saga with the given ordered steps.
    pub fn new(id: SagaId, name: impl Into<String>, steps: Vec<Step>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            status: SagaStatus::Pending,
            steps,
            data: HashMap::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            last_error: None,
            retry_count: 0,
            last_step_id: None,
        }
    }

    /// Finds a step by ID.
    pub fn step(&self, step_id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// Returns the position of a step by ID.
    pub fn step_index(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }

    /// Returns the ID of the highest-index completed step, if any.
    ///
    /// Cached into `last_step_id` on save as a resume optimization.
    pub fn last_completed_step_id(&self) -> Option<String> {
        self.steps
            .iter()
            .rev()
            .find(|s| s.status == StepStatus::Completed)
            .map(|s| s.id.clone())
    }

    /// Summarizes step counts and completion percentage.
    pub fn progress(&self) -> SagaProgress {
        let mut completed = 0;
        let mut failed = 0;
        let mut compensated = 0;
        for step in &self.steps {
            match step.status {
                StepStatus::Completed => completed += 1,
                StepStatus::Failed => failed += 1,
                StepStatus::Compensated => compensated += 1,
                _ => {}
            }
        }

        let total = self.steps.len();
        let percent = if total == 0 {
            100.0
        } else {
            completed as f64 / total as f64 * 100.0
        };

        SagaProgress {
            saga_id: self.id.clone(),
            status: self.status,
            total_steps: total,
            completed_steps: completed,
            failed_steps: failed,
            compensated_steps: compensated,
            progress_percent: percent,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        }
    }
}

/// Point-in-time execution summary of a saga.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaProgress {
    pub saga_id: SagaId,
    pub status: SagaStatus,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub compensated_steps: usize,
    pub progress_percent: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}
