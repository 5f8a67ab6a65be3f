use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use crate::domain::execution::ExecutionStatus;
use crate::CoreError;

/// Value object: Tenant ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

/// Value object: Flow ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowId(pub String);

/// Value object: Step ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId(pub String);

impl FlowId {
    /// Generate a fresh flow id
    pub fn generate() -> Self {
        FlowId(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(value: &str) -> Self {
        TenantId(value.to_string())
    }
}

impl From<&str> for FlowId {
    fn from(value: &str) -> Self {
        FlowId(value.to_string())
    }
}

impl From<&str> for StepId {
    fn from(value: &str) -> Self {
        StepId(value.to_string())
    }
}

/// Lifecycle status of a flow definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowStatus {
    /// Flow may be executed
    Active,
    /// Flow is temporarily switched off by its owner
    Paused,
    /// Flow is retired
    Disabled,
}

impl FlowStatus {
    /// Stable string form used by stores
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStatus::Active => "active",
            FlowStatus::Paused => "paused",
            FlowStatus::Disabled => "disabled",
        }
    }

    /// Parse the stable string form
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        match value {
            "active" => Ok(FlowStatus::Active),
            "paused" => Ok(FlowStatus::Paused),
            "disabled" => Ok(FlowStatus::Disabled),
            other => Err(CoreError::SerializationError(format!(
                "Unknown flow status: {}",
                other
            ))),
        }
    }
}

/// Configuration of a trigger step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerConfig {
    /// Kind of trigger that started the flow (webhook, schedule, ...)
    #[serde(default)]
    pub trigger_type: Option<String>,
    /// Free-form trigger parameters
    #[serde(default = "empty_object")]
    pub parameters: Value,
}

/// Configuration of an action step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionConfig {
    /// Integration selector; used to find a registered action handler
    #[serde(default)]
    pub action_type: Option<String>,
    /// Free-form action parameters
    #[serde(default = "empty_object")]
    pub parameters: Value,
}

/// Configuration of a condition step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionConfig {
    /// Identifier of the predicate to evaluate
    #[serde(default)]
    pub condition: Option<String>,
}

/// Configuration of a delay step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayConfig {
    /// Delay in milliseconds; engine default applies when unset
    #[serde(default)]
    pub delay_duration: Option<u64>,
}

fn empty_object() -> Value {
    json!({})
}

/// Execution policy of a step, each variant carrying only its own settings
#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    /// Marker step that records how the flow was started
    Trigger(TriggerConfig),
    /// Side-effecting integration point
    Action(ActionConfig),
    /// Predicate evaluated against the current context
    Condition(ConditionConfig),
    /// Suspends the execution for a while
    Delay(DelayConfig),
}

impl StepKind {
    /// Type tag as it appears in stored definitions
    pub fn type_name(&self) -> &'static str {
        match self {
            StepKind::Trigger(_) => "trigger",
            StepKind::Action(_) => "action",
            StepKind::Condition(_) => "condition",
            StepKind::Delay(_) => "delay",
        }
    }

    /// Decode a loosely typed `(type, config)` pair
    pub fn parse(step_id: &str, step_type: &str, config: Value) -> Result<Self, CoreError> {
        let config = if config.is_null() { json!({}) } else { config };

        let invalid = |e: serde_json::Error| {
            CoreError::ValidationError(format!("Invalid config for step '{}': {}", step_id, e))
        };

        match step_type {
            "trigger" => serde_json::from_value(config).map(StepKind::Trigger).map_err(invalid),
            "action" => serde_json::from_value(config).map(StepKind::Action).map_err(invalid),
            "condition" => serde_json::from_value(config)
                .map(StepKind::Condition)
                .map_err(invalid),
            "delay" => serde_json::from_value(config).map(StepKind::Delay).map_err(invalid),
            _ => Err(CoreError::UnknownStepType(step_id.to_string())),
        }
    }

    /// Encode the settings back into a config object
    pub fn config_value(&self) -> Value {
        match self {
            StepKind::Trigger(c) => json!({
                "triggerType": c.trigger_type,
                "parameters": c.parameters,
            }),
            StepKind::Action(c) => json!({
                "actionType": c.action_type,
                "parameters": c.parameters,
            }),
            StepKind::Condition(c) => json!({ "condition": c.condition }),
            StepKind::Delay(c) => json!({ "delayDuration": c.delay_duration }),
        }
    }
}

/// Loosely typed step as supplied by callers and stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSpec {
    /// Step id, unique within the flow
    pub id: String,
    /// One of trigger, action, condition, delay
    #[serde(rename = "type")]
    pub step_type: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Type-specific configuration
    #[serde(default)]
    pub config: Value,
    /// Successor step ids
    #[serde(default)]
    pub next_steps: Vec<String>,
    /// Authoring hint
    #[serde(default)]
    pub order: u32,
}

impl StepSpec {
    /// Create a step spec with an empty config
    pub fn new(id: &str, step_type: &str) -> Self {
        Self {
            id: id.to_string(),
            step_type: step_type.to_string(),
            name: id.to_string(),
            config: Value::Null,
            next_steps: Vec::new(),
            order: 0,
        }
    }

    /// Set the config object
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    /// Append a successor
    pub fn then(mut self, next: &str) -> Self {
        self.next_steps.push(next.to_string());
        self
    }

    /// Set the authoring order hint
    pub fn with_order(mut self, order: u32) -> Self {
        self.order = order;
        self
    }
}

/// Represents a validated step in a flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StepSpec", into = "StepSpec")]
pub struct StepDefinition {
    /// ID of the step
    pub id: StepId,
    /// Display name
    pub name: String,
    /// Execution policy and its settings
    pub kind: StepKind,
    /// Successor step ids; empty means terminal
    pub next_steps: Vec<StepId>,
    /// Authoring hint, not used for traversal
    pub order: u32,
}

impl StepDefinition {
    /// First listed successor, the only one the orchestrator follows
    pub fn next_step(&self) -> Option<&StepId> {
        self.next_steps.first()
    }
}

impl TryFrom<StepSpec> for StepDefinition {
    type Error = CoreError;

    fn try_from(spec: StepSpec) -> Result<Self, Self::Error> {
        if spec.id.trim().is_empty() {
            return Err(CoreError::ValidationError(
                "Step id must not be empty".to_string(),
            ));
        }

        let kind = StepKind::parse(&spec.id, &spec.step_type, spec.config)?;

        Ok(StepDefinition {
            name: if spec.name.is_empty() { spec.id.clone() } else { spec.name },
            id: StepId(spec.id),
            kind,
            next_steps: spec.next_steps.into_iter().map(StepId).collect(),
            order: spec.order,
        })
    }
}

impl From<StepDefinition> for StepSpec {
    fn from(step: StepDefinition) -> Self {
        StepSpec {
            step_type: step.kind.type_name().to_string(),
            config: step.kind.config_value(),
            id: step.id.0,
            name: step.name,
            next_steps: step.next_steps.into_iter().map(|s| s.0).collect(),
            order: step.order,
        }
    }
}

/// A tenant-owned, ordered graph of steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDefinition {
    /// ID of the flow
    pub id: FlowId,
    /// Owning tenant, never changes
    pub tenant_id: TenantId,
    /// Human-readable name of the flow
    pub name: String,
    /// Description of the flow
    pub description: String,
    /// The steps in this flow; the first one is the entry point
    pub steps: Vec<StepDefinition>,
    /// Lifecycle status
    pub status: FlowStatus,
    /// Number of executions that reached a terminal state
    pub total_executions: u64,
    /// Number of completed executions
    pub successful_executions: u64,
    /// Number of failed executions
    pub failed_executions: u64,
    /// When an execution last finished
    pub last_executed_at: Option<DateTime<Utc>>,
    /// Outcome of the last finished execution
    pub last_execution_status: Option<ExecutionStatus>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl FlowDefinition {
    /// Create a new, active flow definition with a fresh id
    pub fn new(
        tenant_id: TenantId,
        name: impl Into<String>,
        description: impl Into<String>,
        steps: Vec<StepDefinition>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: FlowId::generate(),
            tenant_id,
            name: name.into(),
            description: description.into(),
            steps,
            status: FlowStatus::Active,
            total_executions: 0,
            successful_executions: 0,
            failed_executions: 0,
            last_executed_at: None,
            last_execution_status: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Validate the flow definition
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.steps.is_empty() {
            return Err(CoreError::EmptyFlowDefinition(self.id.0.clone()));
        }

        let mut seen = HashSet::with_capacity(self.steps.len());
        for step in &self.steps {
            if !seen.insert(&step.id) {
                return Err(CoreError::ValidationError(format!(
                    "Duplicate step id '{}' in flow '{}'",
                    step.id, self.id
                )));
            }
        }

        Ok(())
    }

    /// Entry point of the flow
    pub fn first_step(&self) -> Option<&StepDefinition> {
        self.steps.first()
    }

    /// Find a step by id
    pub fn find_step(&self, id: &StepId) -> Option<&StepDefinition> {
        self.steps.iter().find(|step| &step.id == id)
    }

    /// Apply the outcome of a finished execution to the counters
    pub fn record_outcome(&mut self, status: ExecutionStatus, at: DateTime<Utc>) {
        self.total_executions += 1;
        match status {
            ExecutionStatus::Completed => self.successful_executions += 1,
            ExecutionStatus::Failed => self.failed_executions += 1,
            ExecutionStatus::Running | ExecutionStatus::Paused => {}
        }
        self.last_executed_at = Some(at);
        self.last_execution_status = Some(status);
        self.updated_at = Utc::now();
    }
}
