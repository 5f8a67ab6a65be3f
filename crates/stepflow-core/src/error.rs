use thiserror::Error;

/// Core error type for the Stepflow engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Flow is missing or owned by another tenant
    #[error("Flow not found: {0}")]
    FlowNotFound(String),

    /// Flow has zero steps
    #[error("Flow has no steps: {0}")]
    EmptyFlowDefinition(String),

    /// A step reference points to a step id absent from the flow
    #[error("Step not found: {0}")]
    StepNotFound(String),

    /// Step type outside the closed set
    #[error("Unknown step type for step: {0}")]
    UnknownStepType(String),

    /// Failure raised inside an action, condition or delay implementation
    #[error("Step execution error in step '{step_id}': {message}")]
    StepExecutionError {
        /// Step that failed
        step_id: String,
        /// Underlying failure
        message: String,
    },

    /// A store write or read failed
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// Execution record is missing or owned by another tenant
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    /// Malformed flow or step input
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl CoreError {
    /// Wrap a failure raised while running a step
    pub fn step_execution(step_id: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::StepExecutionError {
            step_id: step_id.into(),
            message: message.into(),
        }
    }

    /// Step id the error points at, when it is known
    pub fn step_id(&self) -> Option<&str> {
        match self {
            CoreError::StepNotFound(id) | CoreError::UnknownStepType(id) => Some(id),
            CoreError::StepExecutionError { step_id, .. } => Some(step_id),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let errors = vec![
            (CoreError::FlowNotFound("flow1".to_string()), "Flow not found: flow1"),
            (CoreError::EmptyFlowDefinition("flow1".to_string()), "Flow has no steps: flow1"),
            (CoreError::StepNotFound("ghost".to_string()), "Step not found: ghost"),
            (CoreError::UnknownStepType("s1".to_string()), "Unknown step type for step: s1"),
            (
                CoreError::step_execution("a1", "smtp down"),
                "Step execution error in step 'a1': smtp down",
            ),
            (CoreError::PersistenceError("disk".to_string()), "Persistence error: disk"),
            (CoreError::ExecutionNotFound("e1".to_string()), "Execution not found: e1"),
            (CoreError::ValidationError("bad".to_string()), "Validation error: bad"),
            (CoreError::SerializationError("ser".to_string()), "Serialization error: ser"),
            (CoreError::ConfigurationError("cfg".to_string()), "Configuration error: cfg"),
        ];

        for (error, expected_msg) in errors {
            assert_eq!(error.to_string(), expected_msg);
        }
    }

    #[test]
    fn test_step_id_extraction() {
        assert_eq!(CoreError::StepNotFound("ghost".into()).step_id(), Some("ghost"));
        assert_eq!(CoreError::step_execution("a1", "boom").step_id(), Some("a1"));
        assert_eq!(CoreError::FlowNotFound("f".into()).step_id(), None);
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let error: CoreError = json_error.into();

        match error {
            CoreError::SerializationError(msg) => assert!(msg.contains("expected value")),
            _ => panic!("Expected SerializationError variant"),
        }
    }
}
