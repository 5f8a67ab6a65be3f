//! Repository traits for Stepflow
//!
//! This module defines the store interfaces the engine persists through.
//! External crates implement these traits to provide durable storage; the
//! `memory` module (feature `testing`) keeps everything in process.
//!
//! Every lookup is scoped by tenant: a record owned by another tenant is
//! reported exactly like a missing one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::execution::{ExecutionId, ExecutionRecord, ExecutionStatus};
use super::flow_definition::{FlowDefinition, FlowId, TenantId};
use crate::CoreError;

/// Repository for flow definitions
#[async_trait]
pub trait FlowRepository: Send + Sync {
    /// Persist a new flow definition and return its id
    async fn create_flow(&self, definition: &FlowDefinition) -> Result<FlowId, CoreError>;

    /// Find a flow definition owned by `tenant_id`
    async fn find_by_id(
        &self,
        id: &FlowId,
        tenant_id: &TenantId,
    ) -> Result<Option<FlowDefinition>, CoreError>;

    /// List the flow definitions owned by `tenant_id`
    async fn list_flows(&self, tenant_id: &TenantId) -> Result<Vec<FlowDefinition>, CoreError>;

    /// Apply the outcome of a finished execution to the flow's counters
    async fn record_execution_outcome(
        &self,
        id: &FlowId,
        tenant_id: &TenantId,
        status: ExecutionStatus,
        at: DateTime<Utc>,
    ) -> Result<(), CoreError>;
}

/// Repository for execution records
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Persist a freshly started execution
    async fn create_execution(&self, execution: &ExecutionRecord) -> Result<(), CoreError>;

    /// Persist a step transition: current step, context, completed steps and logs
    ///
    /// Fails if the stored record is no longer running.
    async fn update_transition(&self, execution: &ExecutionRecord) -> Result<(), CoreError>;

    /// Persist the final state of an execution
    ///
    /// Fails if the stored record was already finalized.
    async fn finalize_execution(&self, execution: &ExecutionRecord) -> Result<(), CoreError>;

    /// Find an execution owned by `tenant_id`
    async fn find_by_id(
        &self,
        id: &ExecutionId,
        tenant_id: &TenantId,
    ) -> Result<Option<ExecutionRecord>, CoreError>;

    /// List the executions of a flow, oldest first
    async fn list_for_flow(
        &self,
        flow_id: &FlowId,
        tenant_id: &TenantId,
    ) -> Result<Vec<ExecutionRecord>, CoreError>;
}

/// Memory implementations for testing
#[cfg(feature = "testing")]
pub mod memory {
    use super::*;
    use dashmap::DashMap;
    use std::sync::Arc;

    /// In-memory implementation of the flow repository
    #[derive(Clone, Default)]
    pub struct MemoryFlowRepository {
        flows: Arc<DashMap<String, FlowDefinition>>,
    }

    impl MemoryFlowRepository {
        /// Create a new memory flow repository
        pub fn new() -> Self {
            Self {
                flows: Arc::new(DashMap::with_capacity(16)),
            }
        }
    }

    #[async_trait]
    impl FlowRepository for MemoryFlowRepository {
        async fn create_flow(&self, definition: &FlowDefinition) -> Result<FlowId, CoreError> {
            if self.flows.contains_key(&definition.id.0) {
                return Err(CoreError::PersistenceError(format!(
                    "Flow already exists: {}",
                    definition.id
                )));
            }
            self.flows
                .insert(definition.id.0.clone(), definition.clone());
            Ok(definition.id.clone())
        }

        async fn find_by_id(
            &self,
            id: &FlowId,
            tenant_id: &TenantId,
        ) -> Result<Option<FlowDefinition>, CoreError> {
            Ok(self
                .flows
                .get(&id.0)
                .filter(|flow| &flow.tenant_id == tenant_id)
                .map(|flow| flow.clone()))
        }

        async fn list_flows(&self, tenant_id: &TenantId) -> Result<Vec<FlowDefinition>, CoreError> {
            let mut flows: Vec<FlowDefinition> = self
                .flows
                .iter()
                .filter(|flow| &flow.tenant_id == tenant_id)
                .map(|flow| flow.clone())
                .collect();
            flows.sort_by_key(|flow| flow.created_at);
            Ok(flows)
        }

        async fn record_execution_outcome(
            &self,
            id: &FlowId,
            tenant_id: &TenantId,
            status: ExecutionStatus,
            at: DateTime<Utc>,
        ) -> Result<(), CoreError> {
            match self.flows.get_mut(&id.0) {
                Some(mut flow) if &flow.tenant_id == tenant_id => {
                    flow.record_outcome(status, at);
                    Ok(())
                }
                _ => Err(CoreError::FlowNotFound(id.0.clone())),
            }
        }
    }

    /// In-memory implementation of the execution repository
    #[derive(Clone, Default)]
    pub struct MemoryExecutionRepository {
        executions: Arc<DashMap<String, ExecutionRecord>>,
    }

    impl MemoryExecutionRepository {
        /// Create a new memory execution repository
        pub fn new() -> Self {
            Self {
                executions: Arc::new(DashMap::with_capacity(64)),
            }
        }

        /// Number of stored executions across all tenants
        pub fn len(&self) -> usize {
            self.executions.len()
        }

        /// Whether no execution was ever stored
        pub fn is_empty(&self) -> bool {
            self.executions.is_empty()
        }

        fn write_running(&self, execution: &ExecutionRecord) -> Result<(), CoreError> {
            let mut stored = self
                .executions
                .get_mut(&execution.id.0)
                .ok_or_else(|| CoreError::ExecutionNotFound(execution.id.0.clone()))?;

            if stored.status != ExecutionStatus::Running {
                return Err(CoreError::PersistenceError(format!(
                    "Execution {} is already finalized as {}",
                    execution.id,
                    stored.status.as_str()
                )));
            }

            *stored = execution.clone();
            Ok(())
        }
    }

    #[async_trait]
    impl ExecutionRepository for MemoryExecutionRepository {
        async fn create_execution(&self, execution: &ExecutionRecord) -> Result<(), CoreError> {
            if self.executions.contains_key(&execution.id.0) {
                return Err(CoreError::PersistenceError(format!(
                    "Execution already exists: {}",
                    execution.id
                )));
            }
            self.executions
                .insert(execution.id.0.clone(), execution.clone());
            Ok(())
        }

        async fn update_transition(&self, execution: &ExecutionRecord) -> Result<(), CoreError> {
            self.write_running(execution)
        }

        async fn finalize_execution(&self, execution: &ExecutionRecord) -> Result<(), CoreError> {
            if !execution.is_terminal() {
                return Err(CoreError::ValidationError(format!(
                    "Execution {} is not in a final state",
                    execution.id
                )));
            }
            self.write_running(execution)
        }

        async fn find_by_id(
            &self,
            id: &ExecutionId,
            tenant_id: &TenantId,
        ) -> Result<Option<ExecutionRecord>, CoreError> {
            Ok(self
                .executions
                .get(&id.0)
                .filter(|execution| &execution.tenant_id == tenant_id)
                .map(|execution| execution.clone()))
        }

        async fn list_for_flow(
            &self,
            flow_id: &FlowId,
            tenant_id: &TenantId,
        ) -> Result<Vec<ExecutionRecord>, CoreError> {
            let mut result: Vec<ExecutionRecord> = self
                .executions
                .iter()
                .filter(|execution| {
                    &execution.flow_id == flow_id && &execution.tenant_id == tenant_id
                })
                .map(|execution| execution.clone())
                .collect();
            result.sort_by_key(|execution| execution.started_at);
            Ok(result)
        }
    }
}

#[cfg(all(test, feature = "testing"))]
mod tests {
    use super::memory::{MemoryExecutionRepository, MemoryFlowRepository};
    use super::*;
    use crate::domain::context::ExecutionContext;
    use crate::domain::flow_definition::{StepDefinition, StepId, StepSpec};

    fn flow(tenant: &str) -> FlowDefinition {
        let steps = vec![StepDefinition::try_from(StepSpec::new("t1", "trigger")).unwrap()];
        FlowDefinition::new(TenantId::from(tenant), "flow", "", steps)
    }

    #[tokio::test]
    async fn test_flow_lookup_is_tenant_scoped() {
        let repo = MemoryFlowRepository::new();
        let definition = flow("acme");
        let id = repo.create_flow(&definition).await.unwrap();

        assert!(repo.find_by_id(&id, &TenantId::from("acme")).await.unwrap().is_some());
        assert!(repo.find_by_id(&id, &TenantId::from("globex")).await.unwrap().is_none());
        assert!(repo.list_flows(&TenantId::from("globex")).await.unwrap().is_empty());
        assert_eq!(repo.list_flows(&TenantId::from("acme")).await.unwrap().len(), 1);

        // duplicate ids are rejected
        assert!(matches!(
            repo.create_flow(&definition).await,
            Err(CoreError::PersistenceError(_))
        ));
    }

    #[tokio::test]
    async fn test_record_execution_outcome() {
        let repo = MemoryFlowRepository::new();
        let definition = flow("acme");
        let tenant = definition.tenant_id.clone();
        repo.create_flow(&definition).await.unwrap();

        repo.record_execution_outcome(&definition.id, &tenant, ExecutionStatus::Completed, Utc::now())
            .await
            .unwrap();

        let stored = repo.find_by_id(&definition.id, &tenant).await.unwrap().unwrap();
        assert_eq!(stored.total_executions, 1);
        assert_eq!(stored.successful_executions, 1);

        let other = repo
            .record_execution_outcome(
                &definition.id,
                &TenantId::from("globex"),
                ExecutionStatus::Failed,
                Utc::now(),
            )
            .await;
        assert!(matches!(other, Err(CoreError::FlowNotFound(_))));
    }

    #[tokio::test]
    async fn test_execution_is_finalized_once() {
        let repo = MemoryExecutionRepository::new();
        let definition = flow("acme");
        let mut execution = ExecutionRecord::start(&definition, ExecutionContext::new()).unwrap();
        repo.create_execution(&execution).await.unwrap();

        execution.advance(StepId::from("t1"), None).unwrap();
        repo.update_transition(&execution).await.unwrap();

        // a running record cannot be finalized
        assert!(repo.finalize_execution(&execution).await.is_err());

        execution.complete().unwrap();
        repo.finalize_execution(&execution).await.unwrap();
        assert!(matches!(
            repo.finalize_execution(&execution).await,
            Err(CoreError::PersistenceError(_))
        ));

        let stored = repo
            .find_by_id(&execution.id, &definition.tenant_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ExecutionStatus::Completed);
        assert!(repo
            .find_by_id(&execution.id, &TenantId::from("globex"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_unknown_execution_update() {
        let repo = MemoryExecutionRepository::new();
        let execution = ExecutionRecord::start(&flow("acme"), ExecutionContext::new()).unwrap();
        assert!(matches!(
            repo.update_transition(&execution).await,
            Err(CoreError::ExecutionNotFound(_))
        ));
    }
}
