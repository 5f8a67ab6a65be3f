//! Flow service
//!
//! The composition root callers talk to. It owns the stores, the step
//! executor and the orchestrator, and exposes flow creation plus the two ways
//! of running a flow: awaiting the whole run, or dispatching it to a
//! background task and polling the stored record.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::application::orchestrator::FlowOrchestrator;
use crate::application::step_executor::StepExecutor;
use crate::config::EngineConfig;
use crate::domain::context::ExecutionContext;
use crate::domain::events::ExecutionEventHandler;
use crate::domain::execution::{ExecutionId, ExecutionRecord, ExecutionStatus};
use crate::domain::flow_definition::{
    FlowDefinition, FlowId, StepDefinition, StepSpec, TenantId,
};
use crate::domain::repository::{ExecutionRepository, FlowRepository};
use crate::CoreError;

/// Entry point for creating and running flows
#[derive(Clone)]
pub struct FlowService {
    flow_repo: Arc<dyn FlowRepository>,
    execution_repo: Arc<dyn ExecutionRepository>,
    orchestrator: Arc<FlowOrchestrator>,
    permits: Arc<Semaphore>,
    config: EngineConfig,
}

impl FlowService {
    /// Create a new flow service
    pub fn new(
        flow_repo: Arc<dyn FlowRepository>,
        execution_repo: Arc<dyn ExecutionRepository>,
        step_executor: Arc<dyn StepExecutor>,
        event_handler: Arc<dyn ExecutionEventHandler>,
        config: EngineConfig,
    ) -> Self {
        let orchestrator = Arc::new(FlowOrchestrator::new(
            flow_repo.clone(),
            execution_repo.clone(),
            step_executor,
            event_handler,
        ));

        Self {
            flow_repo,
            execution_repo,
            orchestrator,
            permits: Arc::new(Semaphore::new(config.max_concurrent_executions.max(1))),
            config,
        }
    }

    /// Configuration the service was built with
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create and persist a flow definition
    pub async fn create_flow(
        &self,
        tenant_id: &TenantId,
        name: &str,
        description: &str,
        steps: Vec<StepSpec>,
    ) -> Result<FlowId, CoreError> {
        if steps.is_empty() {
            return Err(CoreError::EmptyFlowDefinition(name.to_string()));
        }

        let steps = steps
            .into_iter()
            .map(StepDefinition::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        let flow = FlowDefinition::new(tenant_id.clone(), name, description, steps);
        flow.validate()?;

        let flow_id = self.flow_repo.create_flow(&flow).await?;
        info!(
            flow_id = %flow_id,
            tenant_id = %tenant_id,
            steps = flow.steps.len(),
            "Flow created"
        );

        Ok(flow_id)
    }

    /// Run a flow to completion and return the finalized execution record
    ///
    /// `FlowNotFound` and `EmptyFlowDefinition` are reported before any
    /// execution record exists. Any later failure is persisted on the record
    /// and then returned.
    pub async fn execute_flow(
        &self,
        flow_id: &FlowId,
        tenant_id: &TenantId,
        seed: ExecutionContext,
    ) -> Result<ExecutionRecord, CoreError> {
        let (flow, execution) = self.prepare(flow_id, tenant_id, seed).await?;
        self.orchestrator.run(&flow, execution).await
    }

    /// Create the execution record and run it on a background task
    ///
    /// Returns as soon as the record is stored. At most
    /// `max_concurrent_executions` background runs make progress at a time;
    /// the rest wait for a permit while their record stays `running`.
    pub async fn start_flow(
        &self,
        flow_id: &FlowId,
        tenant_id: &TenantId,
        seed: ExecutionContext,
    ) -> Result<ExecutionId, CoreError> {
        let (flow, execution) = self.prepare(flow_id, tenant_id, seed).await?;
        let execution_id = execution.id.clone();

        // Held while the task waits for a permit, so a resume cannot run it twice
        let claim = self.orchestrator.claim(&execution_id)?;
        let orchestrator = self.orchestrator.clone();
        let permits = self.permits.clone();

        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(execution_id = %execution.id, error = %e, "Execution permits closed");
                    return;
                }
            };

            if let Err(e) = orchestrator.run_claimed(&flow, execution, claim).await {
                debug!(error = %e, "Background execution finished with error");
            }
        });

        Ok(execution_id)
    }

    /// Continue a running execution from its stored current step
    ///
    /// Used after a process restart: the record keeps the step to run next,
    /// the context and the completed steps, so the run picks up where the
    /// last persisted transition left it. Fails with `ValidationError` while
    /// this service is still driving the execution.
    pub async fn resume_execution(
        &self,
        execution_id: &ExecutionId,
        tenant_id: &TenantId,
    ) -> Result<ExecutionRecord, CoreError> {
        // Claim before reading so the status check sees the latest write
        let claim = self.orchestrator.claim(execution_id)?;

        let execution = self.get_execution(execution_id, tenant_id).await?;
        if execution.status != ExecutionStatus::Running {
            return Err(CoreError::ValidationError(format!(
                "Execution {} is already {}",
                execution_id,
                execution.status.as_str()
            )));
        }

        let flow = self
            .flow_repo
            .find_by_id(&execution.flow_id, tenant_id)
            .await?
            .ok_or_else(|| CoreError::FlowNotFound(execution.flow_id.0.clone()))?;

        info!(
            execution_id = %execution_id,
            current_step = ?execution.current_step_id,
            "Resuming execution"
        );

        self.orchestrator.run_claimed(&flow, execution, claim).await
    }

    /// Get a flow definition owned by `tenant_id`
    pub async fn get_flow(
        &self,
        flow_id: &FlowId,
        tenant_id: &TenantId,
    ) -> Result<FlowDefinition, CoreError> {
        self.flow_repo
            .find_by_id(flow_id, tenant_id)
            .await?
            .ok_or_else(|| CoreError::FlowNotFound(flow_id.0.clone()))
    }

    /// List the flow definitions owned by `tenant_id`
    pub async fn list_flows(&self, tenant_id: &TenantId) -> Result<Vec<FlowDefinition>, CoreError> {
        self.flow_repo.list_flows(tenant_id).await
    }

    /// Get an execution record owned by `tenant_id`
    pub async fn get_execution(
        &self,
        execution_id: &ExecutionId,
        tenant_id: &TenantId,
    ) -> Result<ExecutionRecord, CoreError> {
        self.execution_repo
            .find_by_id(execution_id, tenant_id)
            .await?
            .ok_or_else(|| CoreError::ExecutionNotFound(execution_id.0.clone()))
    }

    /// List the executions of a flow, oldest first
    pub async fn list_executions(
        &self,
        flow_id: &FlowId,
        tenant_id: &TenantId,
    ) -> Result<Vec<ExecutionRecord>, CoreError> {
        // Resolve the flow first so another tenant's flow reads as missing
        self.get_flow(flow_id, tenant_id).await?;
        self.execution_repo.list_for_flow(flow_id, tenant_id).await
    }

    async fn prepare(
        &self,
        flow_id: &FlowId,
        tenant_id: &TenantId,
        seed: ExecutionContext,
    ) -> Result<(FlowDefinition, ExecutionRecord), CoreError> {
        let flow = match self.flow_repo.find_by_id(flow_id, tenant_id).await? {
            Some(flow) => flow,
            None => {
                warn!(flow_id = %flow_id, tenant_id = %tenant_id, "Flow not found");
                return Err(CoreError::FlowNotFound(flow_id.0.clone()));
            }
        };

        let execution = ExecutionRecord::start(&flow, seed)?;
        self.execution_repo.create_execution(&execution).await?;

        info!(
            execution_id = %execution.id,
            flow_id = %flow.id,
            tenant_id = %tenant_id,
            "Execution created"
        );

        Ok((flow, execution))
    }
}

#[cfg(all(test, feature = "testing"))]
mod tests {
    use super::*;
    use crate::application::step_executor::DefaultStepExecutor;
    use crate::domain::events::NoopEventHandler;
    use crate::domain::flow_definition::StepId;
    use crate::domain::repository::memory::{MemoryExecutionRepository, MemoryFlowRepository};
    use serde_json::json;

    fn service() -> (FlowService, MemoryExecutionRepository) {
        let executions = MemoryExecutionRepository::new();
        let service = FlowService::new(
            Arc::new(MemoryFlowRepository::new()),
            Arc::new(executions.clone()),
            Arc::new(DefaultStepExecutor::default()),
            Arc::new(NoopEventHandler),
            EngineConfig::default(),
        );
        (service, executions)
    }

    #[tokio::test]
    async fn test_create_flow_rejects_empty_steps() {
        let (service, _) = service();
        let err = service
            .create_flow(&TenantId::from("acme"), "empty", "", vec![])
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::EmptyFlowDefinition("empty".to_string()));
    }

    #[tokio::test]
    async fn test_create_flow_rejects_unknown_step_type() {
        let (service, _) = service();
        let err = service
            .create_flow(
                &TenantId::from("acme"),
                "bad",
                "",
                vec![StepSpec::new("t1", "trigger"), StepSpec::new("x1", "webhook")],
            )
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::UnknownStepType("x1".to_string()));
        assert!(service.list_flows(&TenantId::from("acme")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_flow_does_not_start_execution() {
        let (service, executions) = service();
        let tenant = TenantId::from("acme");
        let flow_id = service
            .create_flow(&tenant, "welcome", "greets users", vec![StepSpec::new("t1", "trigger")])
            .await
            .unwrap();

        let flow = service.get_flow(&flow_id, &tenant).await.unwrap();
        assert_eq!(flow.name, "welcome");
        assert_eq!(flow.description, "greets users");
        assert!(executions.is_empty());
    }

    #[tokio::test]
    async fn test_execute_flow_returns_completed_record() {
        let (service, _) = service();
        let tenant = TenantId::from("acme");
        let flow_id = service
            .create_flow(
                &tenant,
                "welcome",
                "",
                vec![
                    StepSpec::new("t1", "trigger").then("a1"),
                    StepSpec::new("a1", "action").with_config(json!({"actionType": "notify"})),
                ],
            )
            .await
            .unwrap();

        let seed = ExecutionContext::from_value(json!({"email": "a@b.c"})).unwrap();
        let record = service.execute_flow(&flow_id, &tenant, seed).await.unwrap();

        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(record.completed_steps, vec![StepId::from("t1"), StepId::from("a1")]);
        assert_eq!(record.context.get("email"), Some(&json!("a@b.c")));
        assert_eq!(record.context.get("actionType"), Some(&json!("notify")));

        let flow = service.get_flow(&flow_id, &tenant).await.unwrap();
        assert_eq!(flow.total_executions, 1);
        assert_eq!(flow.successful_executions, 1);
    }

    #[tokio::test]
    async fn test_unknown_flow_creates_no_record() {
        let (service, executions) = service();
        let err = service
            .execute_flow(&FlowId::from("missing"), &TenantId::from("acme"), ExecutionContext::new())
            .await
            .unwrap_err();

        assert_eq!(err, CoreError::FlowNotFound("missing".to_string()));
        assert!(executions.is_empty());
    }

    #[tokio::test]
    async fn test_resume_rejects_finished_execution() {
        let (service, _) = service();
        let tenant = TenantId::from("acme");
        let flow_id = service
            .create_flow(&tenant, "one", "", vec![StepSpec::new("t1", "trigger")])
            .await
            .unwrap();
        let record = service
            .execute_flow(&flow_id, &tenant, ExecutionContext::new())
            .await
            .unwrap();

        let err = service.resume_execution(&record.id, &tenant).await.unwrap_err();
        assert!(matches!(err, CoreError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_get_execution_is_tenant_scoped() {
        let (service, _) = service();
        let tenant = TenantId::from("acme");
        let flow_id = service
            .create_flow(&tenant, "one", "", vec![StepSpec::new("t1", "trigger")])
            .await
            .unwrap();
        let record = service
            .execute_flow(&flow_id, &tenant, ExecutionContext::new())
            .await
            .unwrap();

        assert!(service.get_execution(&record.id, &tenant).await.is_ok());
        assert!(matches!(
            service.get_execution(&record.id, &TenantId::from("globex")).await,
            Err(CoreError::ExecutionNotFound(_))
        ));
        assert!(matches!(
            service.list_executions(&flow_id, &TenantId::from("globex")).await,
            Err(CoreError::FlowNotFound(_))
        ));
        assert_eq!(service.list_executions(&flow_id, &tenant).await.unwrap().len(), 1);
    }
}
