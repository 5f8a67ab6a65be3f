//!
//! Stepflow Core - tenant-scoped workflow execution engine
//!
//! This crate defines the flow and execution models, the store interfaces,
//! the step executor and the orchestrator that drives an execution through
//! its chain of steps. Storage backends live in their own crates and plug in
//! through the repository traits.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - flow and execution models, events and store interfaces
pub mod domain;

/// Application services - step execution, orchestration and the flow service
pub mod application;

/// Engine configuration
pub mod config;

/// Error types
pub mod error;

pub use error::CoreError;
pub use config::EngineConfig;

// Re-export main API types for easy use
pub use application::flow_service::FlowService;
pub use application::orchestrator::{ExecutionClaim, FlowOrchestrator};
pub use application::step_executor::{
    ActionHandler, ConditionEvaluator, DefaultStepExecutor, FnCondition, StepExecutor,
};
pub use domain::context::{ContextFragment, ExecutionContext};
pub use domain::events::{
    BroadcastEventHandler, ExecutionEvent, ExecutionEventHandler, NoopEventHandler,
};
pub use domain::execution::{ExecutionId, ExecutionLog, ExecutionRecord, ExecutionStatus, LogLevel};
pub use domain::flow_definition::{
    FlowDefinition, FlowId, FlowStatus, StepDefinition, StepId, StepKind, StepSpec, TenantId,
};
pub use domain::repository::{ExecutionRepository, FlowRepository};
