//! SQLite state store implementation for Stepflow
//!
//! This crate provides SQLite implementations of the repository interfaces
//! defined in the stepflow-core crate. Steps, context, completed steps and
//! logs are stored as JSON text columns.

use std::sync::Arc;
use stepflow_core::{CoreError, ExecutionRepository, FlowRepository};
use tracing::info;

pub mod connection;
pub mod migrations;
pub mod repositories;

pub use connection::{SqliteConfig, SqliteConnection};
pub use repositories::{SqliteExecutionRepository, SqliteFlowRepository};

/// Provider for SQLite state store repositories
#[derive(Clone, Debug)]
pub struct SqliteStateStoreProvider {
    connection: SqliteConnection,
}

impl SqliteStateStoreProvider {
    /// Create a provider for `database_url` with default configuration
    pub async fn new(database_url: &str) -> Result<Self, CoreError> {
        Self::with_config(SqliteConfig::new(database_url)).await
    }

    /// Create a provider with custom configuration
    pub async fn with_config(config: SqliteConfig) -> Result<Self, CoreError> {
        let connection = SqliteConnection::new(&config).await?;
        info!(url = %config.database_url, "SQLite state store ready");
        Ok(Self { connection })
    }

    /// Create both repositories over the shared pool
    pub fn create_repositories(&self) -> (Arc<dyn FlowRepository>, Arc<dyn ExecutionRepository>) {
        (
            Arc::new(SqliteFlowRepository::new(self.connection.clone())),
            Arc::new(SqliteExecutionRepository::new(self.connection.clone())),
        )
    }

    /// Get the connection
    pub fn connection(&self) -> &SqliteConnection {
        &self.connection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepflow_core::{FlowDefinition, StepDefinition, StepSpec, TenantId};

    #[tokio::test]
    async fn test_provider_creates_working_repositories() {
        let provider = SqliteStateStoreProvider::new("sqlite::memory:").await.unwrap();
        let (flows, executions) = provider.create_repositories();

        let steps = vec![StepDefinition::try_from(StepSpec::new("t1", "trigger")).unwrap()];
        let flow = FlowDefinition::new(TenantId::from("acme"), "flow", "", steps);
        flows.create_flow(&flow).await.unwrap();

        let loaded = flows.find_by_id(&flow.id, &flow.tenant_id).await.unwrap();
        assert_eq!(loaded.map(|f| f.name), Some("flow".to_string()));
        assert!(executions
            .list_for_flow(&flow.id, &flow.tenant_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_invalid_url_is_a_configuration_error() {
        let err = SqliteStateStoreProvider::new("postgres://nope").await.unwrap_err();
        assert!(matches!(err, CoreError::ConfigurationError(_)));
    }
}
