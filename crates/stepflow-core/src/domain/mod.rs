/// Execution context accumulated across steps
pub mod context;

/// Flow definition domain models
pub mod flow_definition;

/// Execution record domain models
pub mod execution;

/// Execution events
pub mod events;

/// Repository interfaces
pub mod repository;
