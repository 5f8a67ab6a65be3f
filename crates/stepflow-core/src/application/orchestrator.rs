use chrono::Utc;
use dashmap::DashSet;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::application::step_executor::StepExecutor;
use crate::domain::events::{ExecutionEvent, ExecutionEventHandler};
use crate::domain::execution::{ExecutionId, ExecutionRecord, ExecutionStatus, LogLevel};
use crate::domain::flow_definition::{FlowDefinition, StepId};
use crate::domain::repository::{ExecutionRepository, FlowRepository};
use crate::CoreError;

/// Why a run stopped early, and at which step when that is known
struct RunFailure {
    error: CoreError,
    step: Option<StepId>,
}

impl RunFailure {
    fn at(step: &StepId, error: CoreError) -> Self {
        Self {
            error,
            step: Some(step.clone()),
        }
    }

    fn unattributed(error: CoreError) -> Self {
        Self { error, step: None }
    }
}

/// Exclusive right to drive one execution in this process
///
/// Released when dropped.
pub struct ExecutionClaim {
    in_flight: Arc<DashSet<ExecutionId>>,
    execution_id: ExecutionId,
}

impl ExecutionClaim {
    /// Execution this claim covers
    pub fn execution_id(&self) -> &ExecutionId {
        &self.execution_id
    }
}

impl Drop for ExecutionClaim {
    fn drop(&mut self) {
        self.in_flight.remove(&self.execution_id);
    }
}

/// Drives one execution through its flow's step chain
///
/// The loop is sequential: run the current step, merge its fragment into the
/// context, persist the transition to the successor, move on. Only the first
/// listed successor of a step is ever followed. Every run ends with exactly
/// one `finalize_execution` write, `completed` or `failed`.
pub struct FlowOrchestrator {
    flow_repo: Arc<dyn FlowRepository>,
    execution_repo: Arc<dyn ExecutionRepository>,
    step_executor: Arc<dyn StepExecutor>,
    event_handler: Arc<dyn ExecutionEventHandler>,
    in_flight: Arc<DashSet<ExecutionId>>,
}

impl FlowOrchestrator {
    /// Create a new orchestrator
    pub fn new(
        flow_repo: Arc<dyn FlowRepository>,
        execution_repo: Arc<dyn ExecutionRepository>,
        step_executor: Arc<dyn StepExecutor>,
        event_handler: Arc<dyn ExecutionEventHandler>,
    ) -> Self {
        Self {
            flow_repo,
            execution_repo,
            step_executor,
            event_handler,
            in_flight: Arc::new(DashSet::new()),
        }
    }

    /// Claim `execution_id` so no other run in this process drives it
    ///
    /// Fails with `ValidationError` while another claim on the same
    /// execution is alive.
    pub fn claim(&self, execution_id: &ExecutionId) -> Result<ExecutionClaim, CoreError> {
        if !self.in_flight.insert(execution_id.clone()) {
            return Err(CoreError::ValidationError(format!(
                "Execution {} is already being run",
                execution_id
            )));
        }

        Ok(ExecutionClaim {
            in_flight: self.in_flight.clone(),
            execution_id: execution_id.clone(),
        })
    }

    /// Run `execution` from its current step until it completes or fails
    ///
    /// The execution must already be persisted and running. On failure the
    /// record is finalized as `failed` before the error is returned, so the
    /// returned error and the stored `error` field carry the same message.
    pub async fn run(
        &self,
        flow: &FlowDefinition,
        execution: ExecutionRecord,
    ) -> Result<ExecutionRecord, CoreError> {
        let claim = self.claim(&execution.id)?;
        self.run_claimed(flow, execution, claim).await
    }

    /// Run `execution` under a claim taken earlier with [`Self::claim`]
    ///
    /// The claim is held until the run is finalized.
    pub async fn run_claimed(
        &self,
        flow: &FlowDefinition,
        execution: ExecutionRecord,
        claim: ExecutionClaim,
    ) -> Result<ExecutionRecord, CoreError> {
        if claim.execution_id() != &execution.id {
            return Err(CoreError::ValidationError(format!(
                "Claim for execution {} does not cover execution {}",
                claim.execution_id(),
                execution.id
            )));
        }

        let span = info_span!(
            "execution",
            execution_id = %execution.id,
            flow_id = %flow.id,
            tenant_id = %flow.tenant_id,
        );

        let result = self.run_inner(flow, execution).instrument(span).await;
        drop(claim);
        result
    }

    async fn run_inner(
        &self,
        flow: &FlowDefinition,
        mut execution: ExecutionRecord,
    ) -> Result<ExecutionRecord, CoreError> {
        if execution.status != ExecutionStatus::Running {
            return Err(CoreError::ValidationError(format!(
                "Execution {} is not running (status: {})",
                execution.id,
                execution.status.as_str()
            )));
        }

        self.publish(ExecutionEvent::Started {
            execution_id: execution.id.clone(),
            flow_id: flow.id.clone(),
            tenant_id: flow.tenant_id.clone(),
            timestamp: Utc::now(),
        })
        .await;

        match self.drive(flow, &mut execution).await {
            Ok(()) => self.finish_completed(flow, execution).await,
            Err(failure) => Err(self.finish_failed(flow, execution, failure).await),
        }
    }

    async fn drive(
        &self,
        flow: &FlowDefinition,
        execution: &mut ExecutionRecord,
    ) -> Result<(), RunFailure> {
        while let Some(current) = execution.current_step_id.clone() {
            let step = flow
                .find_step(&current)
                .ok_or_else(|| RunFailure::at(&current, CoreError::StepNotFound(current.0.clone())))?;

            let fragment = self
                .step_executor
                .execute(step, &execution.context)
                .await
                .map_err(|e| RunFailure::at(&step.id, e))?;

            execution.context.merge(fragment);

            if step.next_steps.len() > 1 {
                warn!(
                    step_id = %step.id,
                    successors = step.next_steps.len(),
                    "Step lists several successors; only the first is followed"
                );
            }

            let next = step.next_step().cloned();
            execution.log(
                LogLevel::Info,
                format!("Step '{}' completed", step.id),
                Some(json!({ "stepType": step.kind.type_name() })),
            );
            execution
                .advance(step.id.clone(), next.clone())
                .map_err(RunFailure::unattributed)?;

            if next.is_some() {
                self.execution_repo
                    .update_transition(execution)
                    .await
                    .map_err(|e| RunFailure::unattributed(as_persistence_error(e)))?;
            }

            debug!(step_id = %step.id, next = ?next, "Step transition recorded");

            self.publish(ExecutionEvent::StepCompleted {
                execution_id: execution.id.clone(),
                step_id: step.id.clone(),
                timestamp: Utc::now(),
            })
            .await;
        }

        Ok(())
    }

    async fn finish_completed(
        &self,
        flow: &FlowDefinition,
        execution: ExecutionRecord,
    ) -> Result<ExecutionRecord, CoreError> {
        let mut completed = execution.clone();
        completed.log(LogLevel::Info, "Execution completed", None);
        completed.complete()?;

        if let Err(e) = self.execution_repo.finalize_execution(&completed).await {
            let failure = RunFailure::unattributed(as_persistence_error(e));
            return Err(self.finish_failed(flow, execution, failure).await);
        }

        info!(
            steps = completed.completed_steps.len(),
            execution_time_ms = completed.execution_time_ms.unwrap_or_default(),
            "Execution completed"
        );

        self.record_outcome(flow, &completed).await;
        self.publish(ExecutionEvent::Completed {
            execution_id: completed.id.clone(),
            timestamp: Utc::now(),
        })
        .await;

        Ok(completed)
    }

    async fn finish_failed(
        &self,
        flow: &FlowDefinition,
        mut execution: ExecutionRecord,
        failure: RunFailure,
    ) -> CoreError {
        let RunFailure { error, step } = failure;
        let message = error.to_string();

        error!(failed_step = ?step, error = %message, "Execution failed");

        execution.log(
            LogLevel::Error,
            message.clone(),
            step.as_ref().map(|s| json!({ "stepId": s.0 })),
        );

        if let Err(e) = execution.fail(message.clone(), step) {
            error!(error = %e, "Execution could not be marked as failed");
            return error;
        }

        // Stored record was finalized by another run; its outcome stands
        if let Err(e) = self.execution_repo.finalize_execution(&execution).await {
            error!(error = %e, "Failed to persist execution failure");
            return error;
        }

        self.record_outcome(flow, &execution).await;
        self.publish(ExecutionEvent::Failed {
            execution_id: execution.id.clone(),
            error: message,
            timestamp: Utc::now(),
        })
        .await;

        error
    }

    async fn record_outcome(&self, flow: &FlowDefinition, execution: &ExecutionRecord) {
        let at = execution.completed_at.unwrap_or_else(Utc::now);
        if let Err(e) = self
            .flow_repo
            .record_execution_outcome(&flow.id, &flow.tenant_id, execution.status, at)
            .await
        {
            warn!(error = %e, "Failed to update flow execution counters");
        }
    }

    async fn publish(&self, event: ExecutionEvent) {
        let event_type = event.event_type();
        if let Err(e) = self.event_handler.handle_event(event).await {
            warn!(event_type, error = %e, "Execution event handler failed");
        }
    }
}

fn as_persistence_error(error: CoreError) -> CoreError {
    match error {
        CoreError::PersistenceError(_) => error,
        other => CoreError::PersistenceError(other.to_string()),
    }
}
