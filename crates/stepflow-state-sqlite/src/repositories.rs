use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use stepflow_core::{
    CoreError, ExecutionContext, ExecutionId, ExecutionLog, ExecutionRecord, ExecutionRepository,
    ExecutionStatus, FlowDefinition, FlowId, FlowRepository, FlowStatus, StepDefinition, StepId,
    StepSpec, TenantId,
};
use tracing::debug;

use crate::SqliteConnection;

fn db_error(action: &str, e: sqlx::Error) -> CoreError {
    CoreError::PersistenceError(format!("Failed to {}: {}", action, e))
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, CoreError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| CoreError::SerializationError(format!("Error reading column '{}': {}", name, e)))
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, CoreError> {
    Ok(serde_json::to_string(value)?)
}

fn from_json<T: DeserializeOwned>(row: &SqliteRow, name: &str) -> Result<T, CoreError> {
    let raw: String = column(row, name)?;
    serde_json::from_str(&raw).map_err(|e| {
        CoreError::SerializationError(format!("Error decoding column '{}': {}", name, e))
    })
}

/// SQLite implementation of the FlowRepository
#[derive(Clone, Debug)]
pub struct SqliteFlowRepository {
    conn: SqliteConnection,
}

impl SqliteFlowRepository {
    /// Create a new SQLite flow repository
    pub fn new(conn: SqliteConnection) -> Self {
        Self { conn }
    }

    fn decode(row: &SqliteRow) -> Result<FlowDefinition, CoreError> {
        // Decode the loose shape first so an unknown type reports its step id
        let specs: Vec<StepSpec> = from_json(row, "steps")?;
        let steps = specs
            .into_iter()
            .map(StepDefinition::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        let last_execution_status: Option<String> = column(row, "last_execution_status")?;
        let total: i64 = column(row, "total_executions")?;
        let successful: i64 = column(row, "successful_executions")?;
        let failed: i64 = column(row, "failed_executions")?;

        Ok(FlowDefinition {
            id: FlowId(column(row, "id")?),
            tenant_id: TenantId(column(row, "tenant_id")?),
            name: column(row, "name")?,
            description: column(row, "description")?,
            steps,
            status: FlowStatus::parse(&column::<String>(row, "status")?)?,
            total_executions: total.max(0) as u64,
            successful_executions: successful.max(0) as u64,
            failed_executions: failed.max(0) as u64,
            last_executed_at: column(row, "last_executed_at")?,
            last_execution_status: last_execution_status
                .as_deref()
                .map(ExecutionStatus::parse)
                .transpose()?,
            created_at: column(row, "created_at")?,
            updated_at: column(row, "updated_at")?,
        })
    }
}

#[async_trait]
impl FlowRepository for SqliteFlowRepository {
    async fn create_flow(&self, definition: &FlowDefinition) -> Result<FlowId, CoreError> {
        let query = "
            INSERT INTO flows (
                id, tenant_id, name, description, status, steps,
                total_executions, successful_executions, failed_executions,
                last_executed_at, last_execution_status, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ";

        sqlx::query(query)
            .bind(&definition.id.0)
            .bind(&definition.tenant_id.0)
            .bind(&definition.name)
            .bind(&definition.description)
            .bind(definition.status.as_str())
            .bind(to_json(&definition.steps)?)
            .bind(definition.total_executions as i64)
            .bind(definition.successful_executions as i64)
            .bind(definition.failed_executions as i64)
            .bind(definition.last_executed_at)
            .bind(definition.last_execution_status.map(|s| s.as_str()))
            .bind(definition.created_at)
            .bind(definition.updated_at)
            .execute(self.conn.pool())
            .await
            .map_err(|e| db_error("save flow", e))?;

        debug!(flow_id = %definition.id, tenant_id = %definition.tenant_id, "Flow stored");
        Ok(definition.id.clone())
    }

    async fn find_by_id(
        &self,
        id: &FlowId,
        tenant_id: &TenantId,
    ) -> Result<Option<FlowDefinition>, CoreError> {
        let row = sqlx::query("SELECT * FROM flows WHERE id = ? AND tenant_id = ?")
            .bind(&id.0)
            .bind(&tenant_id.0)
            .fetch_optional(self.conn.pool())
            .await
            .map_err(|e| db_error("load flow", e))?;

        row.as_ref().map(Self::decode).transpose()
    }

    async fn list_flows(&self, tenant_id: &TenantId) -> Result<Vec<FlowDefinition>, CoreError> {
        let rows = sqlx::query("SELECT * FROM flows WHERE tenant_id = ? ORDER BY created_at, rowid")
            .bind(&tenant_id.0)
            .fetch_all(self.conn.pool())
            .await
            .map_err(|e| db_error("list flows", e))?;

        rows.iter().map(Self::decode).collect()
    }

    async fn record_execution_outcome(
        &self,
        id: &FlowId,
        tenant_id: &TenantId,
        status: ExecutionStatus,
        at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let query = "
            UPDATE flows SET
                total_executions = total_executions + 1,
                successful_executions = successful_executions + ?,
                failed_executions = failed_executions + ?,
                last_executed_at = ?,
                last_execution_status = ?,
                updated_at = ?
            WHERE id = ? AND tenant_id = ?
        ";

        let result = sqlx::query(query)
            .bind(i64::from(status == ExecutionStatus::Completed))
            .bind(i64::from(status == ExecutionStatus::Failed))
            .bind(at)
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(&id.0)
            .bind(&tenant_id.0)
            .execute(self.conn.pool())
            .await
            .map_err(|e| db_error("update flow counters", e))?;

        if result.rows_affected() == 0 {
            return Err(CoreError::FlowNotFound(id.0.clone()));
        }
        Ok(())
    }
}

/// SQLite implementation of the ExecutionRepository
#[derive(Clone, Debug)]
pub struct SqliteExecutionRepository {
    conn: SqliteConnection,
}

impl SqliteExecutionRepository {
    /// Create a new SQLite execution repository
    pub fn new(conn: SqliteConnection) -> Self {
        Self { conn }
    }

    fn decode(row: &SqliteRow) -> Result<ExecutionRecord, CoreError> {
        let completed_steps: Vec<String> = from_json(row, "completed_steps")?;
        let logs: Vec<ExecutionLog> = from_json(row, "logs")?;
        let context: ExecutionContext = from_json(row, "context")?;
        let current_step: Option<String> = column(row, "current_step")?;
        let failed_step: Option<String> = column(row, "failed_step")?;

        Ok(ExecutionRecord {
            id: ExecutionId(column(row, "id")?),
            flow_id: FlowId(column(row, "flow_id")?),
            tenant_id: TenantId(column(row, "tenant_id")?),
            status: ExecutionStatus::parse(&column::<String>(row, "status")?)?,
            current_step_id: current_step.map(StepId),
            context,
            input_data: from_json(row, "input_data")?,
            completed_steps: completed_steps.into_iter().map(StepId).collect(),
            failed_step: failed_step.map(StepId),
            error: column(row, "error")?,
            execution_time_ms: column(row, "execution_time_ms")?,
            logs,
            started_at: column(row, "started_at")?,
            completed_at: column(row, "completed_at")?,
            updated_at: column(row, "updated_at")?,
        })
    }

    /// Explain why a guarded write touched no row
    async fn rejected_write(&self, execution: &ExecutionRecord) -> CoreError {
        let status = sqlx::query("SELECT status FROM executions WHERE id = ? AND tenant_id = ?")
            .bind(&execution.id.0)
            .bind(&execution.tenant_id.0)
            .fetch_optional(self.conn.pool())
            .await;

        match status {
            Ok(Some(row)) => {
                let status: String = row.try_get("status").unwrap_or_default();
                CoreError::PersistenceError(format!(
                    "Execution {} is already finalized as {}",
                    execution.id, status
                ))
            }
            Ok(None) => CoreError::ExecutionNotFound(execution.id.0.clone()),
            Err(e) => db_error("load execution", e),
        }
    }
}

#[async_trait]
impl ExecutionRepository for SqliteExecutionRepository {
    async fn create_execution(&self, execution: &ExecutionRecord) -> Result<(), CoreError> {
        let query = "
            INSERT INTO executions (
                id, flow_id, tenant_id, status, input_data, context, current_step,
                completed_steps, failed_step, execution_time_ms, error, logs,
                started_at, completed_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ";

        sqlx::query(query)
            .bind(&execution.id.0)
            .bind(&execution.flow_id.0)
            .bind(&execution.tenant_id.0)
            .bind(execution.status.as_str())
            .bind(to_json(&execution.input_data)?)
            .bind(to_json(&execution.context)?)
            .bind(execution.current_step_id.as_ref().map(|s| s.0.as_str()))
            .bind(to_json(&execution.completed_steps)?)
            .bind(execution.failed_step.as_ref().map(|s| s.0.as_str()))
            .bind(execution.execution_time_ms)
            .bind(execution.error.as_deref())
            .bind(to_json(&execution.logs)?)
            .bind(execution.started_at)
            .bind(execution.completed_at)
            .bind(execution.updated_at)
            .execute(self.conn.pool())
            .await
            .map_err(|e| db_error("save execution", e))?;

        debug!(execution_id = %execution.id, "Execution stored");
        Ok(())
    }

    async fn update_transition(&self, execution: &ExecutionRecord) -> Result<(), CoreError> {
        let query = "
            UPDATE executions SET
                current_step = ?,
                context = ?,
                completed_steps = ?,
                logs = ?,
                updated_at = ?
            WHERE id = ? AND tenant_id = ? AND status = 'running'
        ";

        let result = sqlx::query(query)
            .bind(execution.current_step_id.as_ref().map(|s| s.0.as_str()))
            .bind(to_json(&execution.context)?)
            .bind(to_json(&execution.completed_steps)?)
            .bind(to_json(&execution.logs)?)
            .bind(execution.updated_at)
            .bind(&execution.id.0)
            .bind(&execution.tenant_id.0)
            .execute(self.conn.pool())
            .await
            .map_err(|e| db_error("update execution", e))?;

        if result.rows_affected() == 0 {
            return Err(self.rejected_write(execution).await);
        }
        Ok(())
    }

    async fn finalize_execution(&self, execution: &ExecutionRecord) -> Result<(), CoreError> {
        if !execution.is_terminal() {
            return Err(CoreError::ValidationError(format!(
                "Execution {} is not in a final state",
                execution.id
            )));
        }

        let query = "
            UPDATE executions SET
                status = ?,
                context = ?,
                current_step = ?,
                completed_steps = ?,
                failed_step = ?,
                execution_time_ms = ?,
                error = ?,
                logs = ?,
                completed_at = ?,
                updated_at = ?
            WHERE id = ? AND tenant_id = ? AND status = 'running'
        ";

        let result = sqlx::query(query)
            .bind(execution.status.as_str())
            .bind(to_json(&execution.context)?)
            .bind(execution.current_step_id.as_ref().map(|s| s.0.as_str()))
            .bind(to_json(&execution.completed_steps)?)
            .bind(execution.failed_step.as_ref().map(|s| s.0.as_str()))
            .bind(execution.execution_time_ms)
            .bind(execution.error.as_deref())
            .bind(to_json(&execution.logs)?)
            .bind(execution.completed_at)
            .bind(execution.updated_at)
            .bind(&execution.id.0)
            .bind(&execution.tenant_id.0)
            .execute(self.conn.pool())
            .await
            .map_err(|e| db_error("finalize execution", e))?;

        if result.rows_affected() == 0 {
            return Err(self.rejected_write(execution).await);
        }

        debug!(
            execution_id = %execution.id,
            status = execution.status.as_str(),
            "Execution finalized"
        );
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &ExecutionId,
        tenant_id: &TenantId,
    ) -> Result<Option<ExecutionRecord>, CoreError> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = ? AND tenant_id = ?")
            .bind(&id.0)
            .bind(&tenant_id.0)
            .fetch_optional(self.conn.pool())
            .await
            .map_err(|e| db_error("load execution", e))?;

        row.as_ref().map(Self::decode).transpose()
    }

    async fn list_for_flow(
        &self,
        flow_id: &FlowId,
        tenant_id: &TenantId,
    ) -> Result<Vec<ExecutionRecord>, CoreError> {
        let rows = sqlx::query(
            "SELECT * FROM executions WHERE flow_id = ? AND tenant_id = ? ORDER BY started_at, rowid",
        )
        .bind(&flow_id.0)
        .bind(&tenant_id.0)
        .fetch_all(self.conn.pool())
        .await
        .map_err(|e| db_error("list executions", e))?;

        rows.iter().map(Self::decode).collect()
    }
}
