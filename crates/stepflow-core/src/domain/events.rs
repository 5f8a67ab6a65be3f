use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config::EngineConfig;
use crate::domain::execution::ExecutionId;
use crate::domain::flow_definition::{FlowId, StepId, TenantId};
use crate::CoreError;

/// Progress notifications emitted while an execution runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// Execution record was created and the run is about to start
    Started {
        /// The execution
        execution_id: ExecutionId,
        /// The flow being executed
        flow_id: FlowId,
        /// Owning tenant
        tenant_id: TenantId,
        /// When the event occurred
        timestamp: DateTime<Utc>,
    },
    /// A step finished and its transition was persisted
    StepCompleted {
        /// The execution
        execution_id: ExecutionId,
        /// The finished step
        step_id: StepId,
        /// When the event occurred
        timestamp: DateTime<Utc>,
    },
    /// Execution finished successfully
    Completed {
        /// The execution
        execution_id: ExecutionId,
        /// When the event occurred
        timestamp: DateTime<Utc>,
    },
    /// Execution failed
    Failed {
        /// The execution
        execution_id: ExecutionId,
        /// Persisted error message
        error: String,
        /// When the event occurred
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    /// Returns the type of the event as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            ExecutionEvent::Started { .. } => "execution.started",
            ExecutionEvent::StepCompleted { .. } => "execution.step_completed",
            ExecutionEvent::Completed { .. } => "execution.completed",
            ExecutionEvent::Failed { .. } => "execution.failed",
        }
    }

    /// Returns the execution this event belongs to
    pub fn execution_id(&self) -> &ExecutionId {
        match self {
            ExecutionEvent::Started { execution_id, .. }
            | ExecutionEvent::StepCompleted { execution_id, .. }
            | ExecutionEvent::Completed { execution_id, .. }
            | ExecutionEvent::Failed { execution_id, .. } => execution_id,
        }
    }

    /// Whether this event ends the execution
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionEvent::Completed { .. } | ExecutionEvent::Failed { .. }
        )
    }
}

/// Receives execution events
#[async_trait]
pub trait ExecutionEventHandler: Send + Sync {
    /// Handle an execution event
    async fn handle_event(&self, event: ExecutionEvent) -> Result<(), CoreError>;
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventHandler;

#[async_trait]
impl ExecutionEventHandler for NoopEventHandler {
    async fn handle_event(&self, _event: ExecutionEvent) -> Result<(), CoreError> {
        Ok(())
    }
}

/// Fans events out to any number of subscribers
#[derive(Debug, Clone)]
pub struct BroadcastEventHandler {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl BroadcastEventHandler {
    /// Create a handler buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Create a handler sized by `event_channel_capacity`
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.event_channel_capacity)
    }

    /// Subscribe to events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl ExecutionEventHandler for BroadcastEventHandler {
    async fn handle_event(&self, event: ExecutionEvent) -> Result<(), CoreError> {
        // No subscribers is not an error
        let _ = self.sender.send(event);
        Ok(())
    }
}
