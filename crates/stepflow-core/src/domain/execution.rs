use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use uuid::Uuid;

use crate::domain::context::ExecutionContext;
use crate::domain::flow_definition::{FlowDefinition, FlowId, StepId, TenantId};
use crate::CoreError;

/// Value object: Execution ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub String);

impl ExecutionId {
    /// Generate a fresh execution id
    pub fn generate() -> Self {
        ExecutionId(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Execution is in progress
    Running,
    /// All steps ran successfully
    Completed,
    /// A step or a store write failed
    Failed,
    /// Reserved for cooperative pause/resume; never entered
    Paused,
}

impl ExecutionStatus {
    /// Stable string form used by stores
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Paused => "paused",
        }
    }

    /// Parse the stable string form
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        match value {
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "paused" => Ok(ExecutionStatus::Paused),
            other => Err(CoreError::SerializationError(format!(
                "Unknown execution status: {}",
                other
            ))),
        }
    }

    /// Whether the status is final
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

/// Severity of an execution log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Debug details
    Debug,
    /// Normal progress
    Info,
    /// Something unexpected that did not stop the run
    Warn,
    /// Failure
    Error,
}

/// One entry of the per-execution log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLog {
    /// When the entry was written
    pub timestamp: DateTime<Utc>,
    /// Severity
    pub level: LogLevel,
    /// Human-readable message
    pub message: String,
    /// Optional structured payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ExecutionLog {
    /// Create a log entry stamped now
    pub fn new(level: LogLevel, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            data,
        }
    }
}

/// Aggregate: one run of a flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    /// Unique identifier
    pub id: ExecutionId,
    /// Flow definition being executed
    pub flow_id: FlowId,
    /// Always the owning flow's tenant
    pub tenant_id: TenantId,
    /// Current status
    pub status: ExecutionStatus,
    /// Step to run next; `None` once the run reached the end of the chain
    pub current_step_id: Option<StepId>,
    /// Accumulated context
    pub context: ExecutionContext,
    /// Seed supplied by the caller
    pub input_data: Value,
    /// Steps that ran successfully, in execution order
    pub completed_steps: Vec<StepId>,
    /// Step that failed, when known
    pub failed_step: Option<StepId>,
    /// Error message if the execution failed
    pub error: Option<String>,
    /// Wall-clock run time once finalized
    pub execution_time_ms: Option<i64>,
    /// Per-execution log
    pub logs: Vec<ExecutionLog>,
    /// Start timestamp
    pub started_at: DateTime<Utc>,
    /// Finalization timestamp
    pub completed_at: Option<DateTime<Utc>>,
    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl ExecutionRecord {
    /// Create a running execution positioned on the flow's first step
    ///
    /// The context starts with `flowId`, `tenantId` and `executionId`; the
    /// caller's seed is merged over them.
    pub fn start(flow: &FlowDefinition, seed: ExecutionContext) -> Result<Self, CoreError> {
        let first = flow
            .first_step()
            .ok_or_else(|| CoreError::EmptyFlowDefinition(flow.id.0.clone()))?;

        let id = ExecutionId::generate();
        let now = Utc::now();

        let mut context = ExecutionContext::new();
        context.insert("flowId", json!(flow.id.0));
        context.insert("tenantId", json!(flow.tenant_id.0));
        context.insert("executionId", json!(id.0));
        let input_data = seed.to_value();
        context.merge(seed.as_map().clone());

        Ok(Self {
            id,
            flow_id: flow.id.clone(),
            tenant_id: flow.tenant_id.clone(),
            status: ExecutionStatus::Running,
            current_step_id: Some(first.id.clone()),
            context,
            input_data,
            completed_steps: Vec::new(),
            failed_step: None,
            error: None,
            execution_time_ms: None,
            logs: Vec::new(),
            started_at: now,
            completed_at: None,
            updated_at: now,
        })
    }

    /// Record a finished step and move to its successor
    pub fn advance(&mut self, completed: StepId, next: Option<StepId>) -> Result<(), CoreError> {
        self.ensure_running("advance")?;
        self.completed_steps.push(completed);
        self.current_step_id = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Mark the execution as completed
    pub fn complete(&mut self) -> Result<(), CoreError> {
        self.ensure_running("complete")?;
        self.finish(ExecutionStatus::Completed);
        Ok(())
    }

    /// Mark the execution as failed
    pub fn fail(&mut self, error: String, failed_step: Option<StepId>) -> Result<(), CoreError> {
        self.ensure_running("fail")?;
        self.error = Some(error);
        self.failed_step = failed_step;
        self.finish(ExecutionStatus::Failed);
        Ok(())
    }

    /// Append an entry to the execution log
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>, data: Option<Value>) {
        self.logs.push(ExecutionLog::new(level, message, data));
    }

    /// Whether the execution reached a final state
    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn finish(&mut self, status: ExecutionStatus) {
        let now = Utc::now();
        self.status = status;
        self.completed_at = Some(now);
        self.execution_time_ms = Some((now - self.started_at).num_milliseconds());
        self.updated_at = now;
    }

    fn ensure_running(&self, action: &str) -> Result<(), CoreError> {
        if self.status != ExecutionStatus::Running {
            return Err(CoreError::ValidationError(format!(
                "Cannot {} execution {} in state: {:?}",
                action, self.id, self.status
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::flow_definition::{StepDefinition, StepSpec};

    fn flow() -> FlowDefinition {
        let steps = vec![
            StepDefinition::try_from(StepSpec::new("t1", "trigger").then("a1")).unwrap(),
            StepDefinition::try_from(StepSpec::new("a1", "action")).unwrap(),
        ];
        FlowDefinition::new(TenantId::from("acme"), "welcome", "", steps)
    }

    #[test]
    fn test_start_positions_on_first_step_and_merges_seed() {
        let flow = flow();
        let seed = ExecutionContext::from_value(json!({"email": "a@b.c", "tenantId": "seeded"})).unwrap();

        let execution = ExecutionRecord::start(&flow, seed).unwrap();

        assert_eq!(execution.status, ExecutionStatus::Running);
        assert_eq!(execution.current_step_id, Some(StepId::from("t1")));
        assert_eq!(execution.tenant_id, flow.tenant_id);
        assert_eq!(execution.context.get("flowId"), Some(&json!(flow.id.0)));
        assert_eq!(execution.context.get("executionId"), Some(&json!(execution.id.0)));
        // seed wins over defaults
        assert_eq!(execution.context.get("tenantId"), Some(&json!("seeded")));
        assert_eq!(execution.input_data, json!({"email": "a@b.c", "tenantId": "seeded"}));
    }

    #[test]
    fn test_start_requires_steps() {
        let empty = FlowDefinition::new(TenantId::from("acme"), "empty", "", vec![]);
        let err = ExecutionRecord::start(&empty, ExecutionContext::new()).unwrap_err();
        assert_eq!(err, CoreError::EmptyFlowDefinition(empty.id.0.clone()));
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut execution = ExecutionRecord::start(&flow(), ExecutionContext::new()).unwrap();

        execution.advance(StepId::from("t1"), Some(StepId::from("a1"))).unwrap();
        execution.advance(StepId::from("a1"), None).unwrap();
        execution.complete().unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.completed_steps, vec![StepId::from("t1"), StepId::from("a1")]);
        assert!(execution.completed_at.is_some());
        assert!(execution.execution_time_ms.is_some());

        // finalized exactly once
        assert!(execution.fail("late".to_string(), None).is_err());
        assert!(execution.complete().is_err());
    }

    #[test]
    fn test_fail_records_error_and_step() {
        let mut execution = ExecutionRecord::start(&flow(), ExecutionContext::new()).unwrap();
        execution
            .fail("Step not found: ghost".to_string(), Some(StepId::from("ghost")))
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.error.as_deref(), Some("Step not found: ghost"));
        assert_eq!(execution.failed_step, Some(StepId::from("ghost")));
    }

    #[test]
    fn test_status_string_forms() {
        for status in [
            ExecutionStatus::Running,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Paused,
        ] {
            assert_eq!(ExecutionStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(ExecutionStatus::parse("cancelled").is_err());
        assert!(!ExecutionStatus::Paused.is_terminal());
    }
}
