//! Step execution
//!
//! A [`StepExecutor`] runs exactly one step against the accumulated context
//! and returns a fragment that the orchestrator merges into it. The default
//! executor dispatches on [`StepKind`]; deployments plug real integrations in
//! through [`ActionHandler`]s keyed by `actionType` and
//! [`ConditionEvaluator`]s keyed by condition identifier.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use crate::config::EngineConfig;
use crate::domain::context::{ContextFragment, ExecutionContext};
use crate::domain::flow_definition::{
    ActionConfig, ConditionConfig, DelayConfig, StepDefinition, StepKind, TriggerConfig,
};
use crate::CoreError;

/// Executes a single step
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Run `step` against `context` and return the fragment to merge
    async fn execute(
        &self,
        step: &StepDefinition,
        context: &ExecutionContext,
    ) -> Result<ContextFragment, CoreError>;
}

/// Side-effecting integration behind an action step
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Perform the action; the returned keys are merged over the baseline result
    async fn execute(
        &self,
        parameters: &Value,
        context: &ExecutionContext,
    ) -> Result<ContextFragment, CoreError>;
}

/// Named predicate evaluated by condition steps
pub trait ConditionEvaluator: Send + Sync {
    /// Evaluate the predicate against the current context
    fn evaluate(&self, context: &ExecutionContext) -> Result<bool, CoreError>;
}

/// Evaluator backed by a plain function or closure
pub struct FnCondition<F>(pub F);

impl<F> ConditionEvaluator for FnCondition<F>
where
    F: Fn(&ExecutionContext) -> Result<bool, CoreError> + Send + Sync,
{
    fn evaluate(&self, context: &ExecutionContext) -> Result<bool, CoreError> {
        (self.0)(context)
    }
}

/// Executor dispatching on step kind, with pluggable actions and conditions
pub struct DefaultStepExecutor {
    actions: HashMap<String, Arc<dyn ActionHandler>>,
    conditions: HashMap<String, Arc<dyn ConditionEvaluator>>,
    default_delay: Duration,
}

impl Default for DefaultStepExecutor {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl DefaultStepExecutor {
    /// Create an executor with no registered handlers
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            actions: HashMap::new(),
            conditions: HashMap::new(),
            default_delay: config.default_delay(),
        }
    }

    /// Register the handler for an `actionType`
    pub fn with_action_handler(
        mut self,
        action_type: impl Into<String>,
        handler: Arc<dyn ActionHandler>,
    ) -> Self {
        self.actions.insert(action_type.into(), handler);
        self
    }

    /// Register the evaluator for a condition identifier
    pub fn with_condition(
        mut self,
        condition: impl Into<String>,
        evaluator: Arc<dyn ConditionEvaluator>,
    ) -> Self {
        self.conditions.insert(condition.into(), evaluator);
        self
    }

    fn run_trigger(config: &TriggerConfig) -> ContextFragment {
        fragment(json!({
            "triggerExecuted": true,
            "triggerType": config.trigger_type,
            "triggerData": config.parameters,
        }))
    }

    async fn run_action(
        &self,
        step: &StepDefinition,
        config: &ActionConfig,
        context: &ExecutionContext,
    ) -> Result<ContextFragment, CoreError> {
        let mut result = fragment(json!({
            "actionExecuted": true,
            "actionType": config.action_type,
            "actionData": config.parameters,
        }));

        let handler = config
            .action_type
            .as_deref()
            .and_then(|action_type| self.actions.get(action_type));

        if let Some(handler) = handler {
            let output = handler
                .execute(&config.parameters, context)
                .await
                .map_err(|e| wrap_step_error(step, e))?;
            result.extend(output);
        } else {
            trace!(step_id = %step.id, "No action handler registered, recording baseline result");
        }

        Ok(result)
    }

    fn run_condition(
        &self,
        step: &StepDefinition,
        config: &ConditionConfig,
        context: &ExecutionContext,
    ) -> Result<ContextFragment, CoreError> {
        let evaluator = config
            .condition
            .as_deref()
            .and_then(|condition| self.conditions.get(condition));

        let met = match evaluator {
            Some(evaluator) => evaluator
                .evaluate(context)
                .map_err(|e| wrap_step_error(step, e))?,
            None => true,
        };

        Ok(fragment(json!({
            "conditionMet": met,
            "conditionType": config.condition,
            "evaluationData": context.to_value(),
        })))
    }

    async fn run_delay(&self, config: &DelayConfig) -> ContextFragment {
        let duration = config
            .delay_duration
            .map(Duration::from_millis)
            .unwrap_or(self.default_delay);

        tokio::time::sleep(duration).await;

        fragment(json!({
            "delayCompleted": true,
            "delayDuration": duration.as_millis() as u64,
            "completedAt": Utc::now().to_rfc3339(),
        }))
    }
}

#[async_trait]
impl StepExecutor for DefaultStepExecutor {
    async fn execute(
        &self,
        step: &StepDefinition,
        context: &ExecutionContext,
    ) -> Result<ContextFragment, CoreError> {
        debug!(step_id = %step.id, step_type = step.kind.type_name(), "Executing step");

        match &step.kind {
            StepKind::Trigger(config) => Ok(Self::run_trigger(config)),
            StepKind::Action(config) => self.run_action(step, config, context).await,
            StepKind::Condition(config) => self.run_condition(step, config, context),
            StepKind::Delay(config) => Ok(self.run_delay(config).await),
        }
    }
}

fn fragment(value: Value) -> ContextFragment {
    match value {
        Value::Object(map) => map,
        _ => ContextFragment::new(),
    }
}

fn wrap_step_error(step: &StepDefinition, error: CoreError) -> CoreError {
    match error {
        CoreError::StepExecutionError { .. } => error,
        other => CoreError::step_execution(step.id.0.clone(), other.to_string()),
    }
}
