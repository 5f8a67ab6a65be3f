/// Generate SQL migrations for the SQLite state store
///
/// Every statement is idempotent so the list can be applied on each connect.
pub fn generate_migrations() -> Vec<(&'static str, &'static str)> {
    vec![
        (
            "20250101000000_flows",
            r#"
            CREATE TABLE IF NOT EXISTS flows (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL,
                steps TEXT NOT NULL,
                total_executions INTEGER NOT NULL DEFAULT 0,
                successful_executions INTEGER NOT NULL DEFAULT 0,
                failed_executions INTEGER NOT NULL DEFAULT 0,
                last_executed_at TEXT,
                last_execution_status TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_flows_tenant_id ON flows(tenant_id);
            "#,
        ),
        (
            "20250101000100_executions",
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                flow_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                status TEXT NOT NULL,
                input_data TEXT NOT NULL,
                context TEXT NOT NULL,
                current_step TEXT,
                completed_steps TEXT NOT NULL,
                failed_step TEXT,
                execution_time_ms INTEGER,
                error TEXT,
                logs TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                updated_at TEXT NOT NULL,
                CONSTRAINT fk_flow_id FOREIGN KEY (flow_id) REFERENCES flows(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_executions_flow_id ON executions(flow_id, tenant_id);
            CREATE INDEX IF NOT EXISTS idx_executions_status ON executions(status);
            "#,
        ),
    ]
}
