//! The idempotent saga coordinator.

use std::time::Duration;

use chrono::Utc;
use common::SagaId;
use events::{Event, EventType, event_data};
use outbox::OutboxStore;

use crate::error::{Result, SagaError};
use crate::executor::{ExecutorError, StepExecutor};
use crate::model::{CompensationKind, Saga, Step};
use crate::state::{SagaStatus, StepStatus};
use crate::store::SagaStateStore;

/// Source name stamped on every event the coordinator emits.
const EVENT_SOURCE: &str = "report-service";

/// Tunables for step execution. Configuration, not invariants.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Retries per step after the first attempt.
    pub max_retries: u32,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
    /// Deadline for a single dispatch; a timeout counts as a transient
    /// attempt failure.
    pub step_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            step_timeout: Duration::from_secs(30),
        }
    }
}

/// Orchestrates saga execution with at-most-once effect per saga identity.
///
/// The coordinator is the sole writer to a saga's rows. Every state
/// transition is persisted before and after the side effect it brackets, so
/// a crashed driver can resume: completed steps short-circuit, the event
/// log's unique `event_id` guard suppresses duplicate event handling, and
/// outbox rows carry the events of transitions that committed.
pub struct SagaCoordinator<S, O, E> {
    state_store: S,
    outbox: O,
    executor: E,
    config: CoordinatorConfig,
}

impl<S, O, E> SagaCoordinator<S, O, E>
where
    S: SagaStateStore,
    O: OutboxStore,
    E: StepExecutor,
{
    /// Creates a coordinator with default configuration.
    pub fn new(state_store: S, outbox: O, executor: E) -> Self {
        Self::with_config(state_store, outbox, executor, CoordinatorConfig::default())
    }

    /// Creates a coordinator with explicit configuration.
    pub fn with_config(state_store: S, outbox: O, executor: E, config: CoordinatorConfig) -> Self {
        Self {
            state_store,
            outbox,
            executor,
            config,
        }
    }

    /// Records an event in the idempotency ledger and the outbox.
    ///
    /// Called after the state transition it describes has been persisted;
    /// the outbox publisher delivers it to the bus asynchronously.
    async fn append_event(&self, saga_id: &SagaId, event: Event) -> Result<()> {
        self.state_store
            .log_event(saga_id, &event.id, event.event_type)
            .await?;
        self.outbox.save_event(&event).await?;
        Ok(())
    }

    /// Idempotent saga kickoff.
    ///
    /// Completed (or administratively compensated) sagas are a no-op
    /// success; a saga already executing fails with `AlreadyRunning`; a
    /// failed saga is picked up from its persisted state for resumption.
    #[tracing::instrument(skip(self, saga), fields(saga_id = %saga.id))]
    pub async fn start_saga(&self, mut saga: Saga) -> Result<()> {
        match self.state_store.get_saga(&saga.id).await {
            Ok(existing) => match existing.status {
                SagaStatus::Completed | SagaStatus::Compensated => {
                    tracing::info!(status = %existing.status, "saga already finished");
                    return Ok(());
                }
                SagaStatus::Executing => {
                    return Err(SagaError::AlreadyRunning(saga.id));
                }
                SagaStatus::Failed | SagaStatus::Pending => {
                    // Resume from the persisted aggregate, not the caller's copy:
                    // completed steps and accumulated data live there.
                    saga = existing;
                }
            },
            Err(SagaError::SagaNotFound(_)) => {}
            Err(err) => return Err(err),
        }

        saga.status = SagaStatus::Executing;
        self.state_store.save_saga(&saga).await?;

        let event = Event::new(
            EventType::SagaStarted,
            EVENT_SOURCE,
            event_data! {
                "saga_id" => saga.id.as_str(),
                "saga_name" => saga.name.clone(),
                "steps" => saga.steps.len(),
            },
        );
        self.append_event(&saga.id, event).await?;

        metrics::counter!("saga_executions_total").increment(1);
        tracing::info!(name = %saga.name, steps = saga.steps.len(), "saga started");
        Ok(())
    }

    /// Advances one step with bounded retries.
    ///
    /// A completed step is a no-op success (double-fires are harmless); a
    /// step currently executing fails with `StepBusy`.
    #[tracing::instrument(skip(self))]
    pub async fn execute_step(&self, saga_id: &SagaId, step_id: &str) -> Result<()> {
        let mut saga = self.state_store.get_saga(saga_id).await?;
        let index = saga
            .step_index(step_id)
            .ok_or_else(|| SagaError::StepNotFound {
                saga: saga_id.clone(),
                step: step_id.to_string(),
            })?;

        match saga.steps[index].status {
            StepStatus::Completed => {
                tracing::info!("step already completed");
                return Ok(());
            }
            StepStatus::Executing => {
                return Err(SagaError::StepBusy {
                    saga: saga_id.clone(),
                    step: step_id.to_string(),
                });
            }
            _ => {}
        }

        saga.steps[index].status = StepStatus::Executing;
        saga.steps[index].executed_at = Some(Utc::now());
        fill_step_inputs(&mut saga, index);
        self.state_store.save_saga(&saga).await?;

        let mut attempt: u32 = 0;
        loop {
            if attempt > 0 {
                tracing::info!(attempt, "retrying step");
                tokio::time::sleep(self.config.retry_delay).await;
            }

            match self.dispatch(&mut saga.steps[index]).await {
                Ok(()) => {
                    let step = &mut saga.steps[index];
                    step.status = StepStatus::Completed;
                    step.completed_at = Some(Utc::now());
                    step.error = None;

                    merge_step_outputs(&mut saga, index);
                    self.state_store.save_saga(&saga).await?;

                    let step = &saga.steps[index];
                    if let Some(event_type) = success_event_type(step) {
                        let event = step_event(event_type, saga_id, step);
                        self.append_event(saga_id, event).await?;
                    }

                    tracing::info!("step completed");
                    return Ok(());
                }
                Err(err) if err.is_transient() && attempt < self.config.max_retries => {
                    tracing::warn!(attempt = attempt + 1, error = %err, "step attempt failed");
                    attempt += 1;
                }
                Err(err) => {
                    let attempts = attempt + 1;
                    let step = &mut saga.steps[index];
                    step.status = StepStatus::Failed;
                    step.error = Some(err.to_string());
                    saga.last_error = Some(err.to_string());
                    self.state_store.save_saga(&saga).await?;
                    self.state_store.increment_retry_count(saga_id).await?;

                    let step = &saga.steps[index];
                    if let Some(event_type) = failure_event_type(step) {
                        let event = step_event(event_type, saga_id, step);
                        self.append_event(saga_id, event).await?;
                    }

                    tracing::error!(attempts, error = %err, "step failed");
                    return Err(SagaError::StepFailed {
                        step: step_id.to_string(),
                        attempts,
                        source: err,
                    });
                }
            }
        }
    }

    async fn dispatch(&self, step: &mut Step) -> std::result::Result<(), ExecutorError> {
        match tokio::time::timeout(self.config.step_timeout, self.executor.execute(step)).await {
            Ok(result) => result,
            Err(_) => Err(ExecutorError::Transient(format!(
                "step timed out after {:?}",
                self.config.step_timeout
            ))),
        }
    }

    /// Undoes one step with bounded retries.
    ///
    /// A step already compensated is a no-op success; a non-compensating
    /// step is marked compensated without dispatching. On final failure the
    /// step is left as-is so the caller can keep unwinding earlier steps.
    #[tracing::instrument(skip(self))]
    pub async fn compensate_step(&self, saga_id: &SagaId, step_id: &str) -> Result<()> {
        let mut saga = self.state_store.get_saga(saga_id).await?;
        let index = saga
            .step_index(step_id)
            .ok_or_else(|| SagaError::StepNotFound {
                saga: saga_id.clone(),
                step: step_id.to_string(),
            })?;

        if saga.steps[index].status == StepStatus::Compensated {
            tracing::info!("step already compensated");
            return Ok(());
        }

        if saga.steps[index].compensate == CompensationKind::None {
            saga.steps[index].status = StepStatus::Compensated;
            self.state_store.save_saga(&saga).await?;
            return Ok(());
        }

        let mut attempt: u32 = 0;
        loop {
            if attempt > 0 {
                tracing::info!(attempt, "retrying compensation");
                tokio::time::sleep(self.config.retry_delay).await;
            }

            let result = match tokio::time::timeout(
                self.config.step_timeout,
                self.executor.compensate(&mut saga.steps[index]),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ExecutorError::Transient(format!(
                    "compensation timed out after {:?}",
                    self.config.step_timeout
                ))),
            };

            match result {
                Ok(()) => {
                    saga.steps[index].status = StepStatus::Compensated;
                    self.state_store.save_saga(&saga).await?;

                    let step = &saga.steps[index];
                    let event = Event::new(
                        EventType::SagaCompensated,
                        EVENT_SOURCE,
                        event_data! {
                            "saga_id" => saga_id.as_str(),
                            "step_id" => step.id.clone(),
                            "service" => step.service.clone(),
                            "action" => step.compensate.as_str(),
                        },
                    );
                    self.append_event(saga_id, event).await?;

                    tracing::info!("step compensated");
                    return Ok(());
                }
                Err(err) if err.is_transient() && attempt < self.config.max_retries => {
                    tracing::warn!(attempt = attempt + 1, error = %err, "compensation attempt failed");
                    attempt += 1;
                }
                Err(err) => {
                    tracing::error!(error = %err, "compensation failed; continuing unwind");
                    return Err(SagaError::CompensationFailed {
                        step: step_id.to_string(),
                        attempts: attempt + 1,
                        source: err,
                    });
                }
            }
        }
    }

    /// Loads a saga aggregate.
    pub async fn get_saga(&self, saga_id: &SagaId) -> Result<Saga> {
        self.state_store.get_saga(saga_id).await
    }

    /// Sets the saga status and emits the matching lifecycle event for
    /// terminal transitions.
    #[tracing::instrument(skip(self))]
    pub async fn update_saga_status(&self, saga_id: &SagaId, status: SagaStatus) -> Result<()> {
        self.state_store.update_saga_status(saga_id, status).await?;

        let event_type = match status {
            SagaStatus::Completed => Some(EventType::SagaCompleted),
            SagaStatus::Failed => Some(EventType::SagaFailed),
            SagaStatus::Compensated => Some(EventType::SagaCompensated),
            SagaStatus::Pending | SagaStatus::Executing => None,
        };

        if let Some(event_type) = event_type {
            let event = Event::new(
                event_type,
                EVENT_SOURCE,
                event_data! {
                    "saga_id" => saga_id.as_str(),
                    "status" => status.as_str(),
                },
            );
            self.append_event(saga_id, event).await?;
        }

        tracing::info!(%status, "saga status updated");
        Ok(())
    }

    /// Administrative terminal override: marks the saga completed no matter
    /// what state it is in, for recovery when the external effect is known
    /// complete but a step failed to record.
    #[tracing::instrument(skip(self))]
    pub async fn force_complete_saga(&self, saga_id: &SagaId) -> Result<()> {
        self.state_store.get_saga(saga_id).await?;
        self.update_saga_status(saga_id, SagaStatus::Completed).await
    }

    /// Moves a failed saga back through execution.
    ///
    /// Failed and compensated steps are reset to pending (clearing their
    /// errors and timestamps); completed steps short-circuit as usual.
    #[tracing::instrument(skip(self))]
    pub async fn retry_failed_saga(&self, saga_id: &SagaId) -> Result<()> {
        let mut saga = self.state_store.get_saga(saga_id).await?;
        if !saga.status.can_retry() {
            return Err(SagaError::InvalidTransition {
                saga: saga_id.clone(),
                expected: SagaStatus::Failed,
                actual: saga.status,
            });
        }

        for step in &mut saga.steps {
            if matches!(step.status, StepStatus::Failed | StepStatus::Compensated) {
                step.reset_for_retry();
            }
        }
        saga.status = SagaStatus::Pending;
        saga.last_error = None;
        self.state_store.save_saga(&saga).await?;

        tracing::info!("retrying failed saga");
        self.run_saga(saga).await
    }

    /// Drives the whole saga: start, execute steps in order, then complete
    /// or unwind.
    ///
    /// Re-entrant by construction: a saga already executing is resumed
    /// (completed steps short-circuit), a finished saga is a no-op. This is
    /// what makes process restarts safe.
    #[tracing::instrument(skip(self, saga), fields(saga_id = %saga.id))]
    pub async fn run_saga(&self, saga: Saga) -> Result<()> {
        let saga_id = saga.id.clone();
        let started = std::time::Instant::now();

        match self.start_saga(saga).await {
            Ok(()) => {}
            Err(SagaError::AlreadyRunning(_)) => {
                tracing::info!("saga marked executing; resuming");
            }
            Err(err) => return Err(err),
        }

        let mut current = self.state_store.get_saga(&saga_id).await?;
        if current.status.is_terminal() {
            return Ok(());
        }

        // Crash recovery: a step left executing belongs to a driver that
        // died before committing its outcome; run it again.
        let mut recovered = false;
        for step in &mut current.steps {
            if step.status == StepStatus::Executing {
                step.status = StepStatus::Pending;
                recovered = true;
            }
        }
        if recovered {
            tracing::warn!("recovered steps left executing by a previous driver");
            self.state_store.save_saga(&current).await?;
        }

        let step_ids: Vec<String> = current.steps.iter().map(|s| s.id.clone()).collect();

        for (index, step_id) in step_ids.iter().enumerate() {
            if let Err(err) = self.execute_step(&saga_id, step_id).await {
                // Neither the status update nor the unwind may mask the
                // original step error.
                if let Err(status_err) = self.update_saga_status(&saga_id, SagaStatus::Failed).await
                {
                    tracing::error!(error = %status_err, "failed to mark saga failed");
                }
                if let Err(comp_err) = self
                    .compensate_completed(&saga_id, &step_ids[..index])
                    .await
                {
                    tracing::error!(error = %comp_err, "unwind bookkeeping failed");
                }

                metrics::counter!("saga_failed").increment(1);
                metrics::histogram!("saga_duration_seconds")
                    .record(started.elapsed().as_secs_f64());
                tracing::warn!(failed_step = %step_id, "saga failed and was unwound");
                return Err(err);
            }
        }

        self.update_saga_status(&saga_id, SagaStatus::Completed)
            .await?;

        metrics::counter!("saga_completed").increment(1);
        metrics::histogram!("saga_duration_seconds").record(started.elapsed().as_secs_f64());
        tracing::info!("saga completed");
        Ok(())
    }

    /// Unwinds the completed prefix in strictly decreasing step order.
    ///
    /// Compensation failures are logged and the unwind continues; the saga
    /// keeps its `Failed` label so it stays eligible for retry.
    async fn compensate_completed(&self, saga_id: &SagaId, completed: &[String]) -> Result<()> {
        for step_id in completed.iter().rev() {
            if let Err(err) = self.compensate_step(saga_id, step_id).await {
                tracing::error!(step = %step_id, error = %err, "compensation error; continuing");
            }
        }

        let event = Event::new(
            EventType::SagaCompensated,
            EVENT_SOURCE,
            event_data! {
                "saga_id" => saga_id.as_str(),
                "status" => SagaStatus::Failed.as_str(),
            },
        );
        self.append_event(saga_id, event).await
    }

    /// Inbound event handler for choreography-mode participation.
    ///
    /// The ledger's unique `event_id` gives at-most-once handling across
    /// redeliveries from an at-least-once bus: a duplicate performs no side
    /// effect beyond the observation.
    #[tracing::instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn handle_saga_event(&self, event: &Event) -> Result<()> {
        if self.state_store.is_event_processed(&event.id).await? {
            tracing::info!("event already processed; skipping");
            return Ok(());
        }

        let Some(saga_id) = event.data_str("saga_id").map(SagaId::from) else {
            tracing::warn!("saga event without saga_id; ignoring");
            return Ok(());
        };

        self.state_store
            .log_event(&saga_id, &event.id, event.event_type)
            .await?;

        match event.event_type {
            EventType::SagaStarted => tracing::info!(%saga_id, "peer saga started"),
            EventType::SagaCompleted => tracing::info!(%saga_id, "peer saga completed"),
            EventType::SagaFailed => tracing::warn!(%saga_id, "peer saga failed"),
            EventType::SagaCompensated => tracing::info!(%saga_id, "peer saga compensated"),
            other => tracing::debug!(%saga_id, event_type = %other, "unrouted saga event"),
        }

        Ok(())
    }
}

/// Copies scratch values a step does not define into its input data.
///
/// This is how `report_id` written by `generate-report` reaches the
/// downstream steps deterministically.
fn fill_step_inputs(saga: &mut Saga, index: usize) {
    let scratch = saga.data.clone();
    let step = &mut saga.steps[index];
    for (key, value) in scratch {
        step.data.entry(key).or_insert(value);
    }
}

/// Copies a completed step's data into the saga scratch map.
fn merge_step_outputs(saga: &mut Saga, index: usize) {
    let outputs = saga.steps[index].data.clone();
    saga.data.extend(outputs);
}

fn step_event(event_type: EventType, saga_id: &SagaId, step: &Step) -> Event {
    Event::new(
        event_type,
        EVENT_SOURCE,
        event_data! {
            "saga_id" => saga_id.as_str(),
            "step_id" => step.id.clone(),
            "service" => step.service.clone(),
            "action" => step.action.clone(),
        },
    )
}

/// Event emitted when a step completes, keyed by its dispatch identity.
///
/// Notification steps emit nothing here: their observable effect is the
/// `report.completed` event the executor itself queues.
fn success_event_type(step: &Step) -> Option<EventType> {
    match (step.service.as_str(), step.action.as_str()) {
        ("user-service", _) => Some(EventType::UserValidated),
        ("template-service", _) => Some(EventType::TemplateValidated),
        ("data-service", _) => Some(EventType::DataCollected),
        ("storage-service", _) => Some(EventType::FileStored),
        ("report-service", "generate_report") => Some(EventType::ReportGenerated),
        ("report-service", _) => Some(EventType::ReportUpdated),
        _ => None,
    }
}

fn failure_event_type(step: &Step) -> Option<EventType> {
    match (step.service.as_str(), step.action.as_str()) {
        ("user-service", _) => Some(EventType::UserValidationFailed),
        ("template-service", _) => Some(EventType::TemplateValidationFailed),
        ("data-service", _) => Some(EventType::DataCollectionFailed),
        ("storage-service", _) => Some(EventType::FileStorageFailed),
        ("report-service", _) => Some(EventType::ReportFailed),
        _ => None,
    }
}
