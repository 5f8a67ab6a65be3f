/// Type-dispatched execution of a single step
pub mod step_executor;

/// Drives one execution through the step chain
pub mod orchestrator;

/// Tenant-scoped entry points
pub mod flow_service;
