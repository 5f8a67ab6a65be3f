use serde_json::json;
use std::sync::Arc;

use stepflow_core::{
    CoreError, DefaultStepExecutor, EngineConfig, ExecutionContext, ExecutionRecord,
    ExecutionRepository, ExecutionStatus, FlowDefinition, FlowRepository, FlowService,
    NoopEventHandler, StepDefinition, StepId, StepSpec, TenantId,
};
use stepflow_state_sqlite::{SqliteConfig, SqliteStateStoreProvider};

async fn memory_store() -> SqliteStateStoreProvider {
    SqliteStateStoreProvider::new("sqlite::memory:").await.unwrap()
}

fn flow(tenant: &str) -> FlowDefinition {
    let steps = vec![
        StepSpec::new("t1", "trigger")
            .with_config(json!({"triggerType": "webhook"}))
            .then("a1"),
        StepSpec::new("a1", "action")
            .with_config(json!({"actionType": "notify", "parameters": {"channel": "email"}}))
            .with_order(1),
    ]
    .into_iter()
    .map(|s| StepDefinition::try_from(s).unwrap())
    .collect();
    FlowDefinition::new(TenantId::from(tenant), "welcome", "greets new users", steps)
}

#[tokio::test]
async fn flow_round_trips_through_sqlite() {
    let store = memory_store().await;
    let (flows, _) = store.create_repositories();
    let definition = flow("acme");

    flows.create_flow(&definition).await.unwrap();
    let loaded = flows
        .find_by_id(&definition.id, &definition.tenant_id)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(loaded.id, definition.id);
    assert_eq!(loaded.name, "welcome");
    assert_eq!(loaded.description, "greets new users");
    assert_eq!(loaded.steps, definition.steps);
    assert_eq!(loaded.status, definition.status);
    assert_eq!(loaded.total_executions, 0);
}

#[tokio::test]
async fn reads_are_tenant_scoped() {
    let store = memory_store().await;
    let (flows, executions) = store.create_repositories();
    let definition = flow("tenant-a");
    flows.create_flow(&definition).await.unwrap();
    let execution = ExecutionRecord::start(&definition, ExecutionContext::new()).unwrap();
    executions.create_execution(&execution).await.unwrap();

    let other = TenantId::from("tenant-b");
    assert!(flows.find_by_id(&definition.id, &other).await.unwrap().is_none());
    assert!(flows.list_flows(&other).await.unwrap().is_empty());
    assert!(executions.find_by_id(&execution.id, &other).await.unwrap().is_none());
    assert!(executions
        .list_for_flow(&definition.id, &other)
        .await
        .unwrap()
        .is_empty());
    assert!(matches!(
        flows
            .record_execution_outcome(&definition.id, &other, ExecutionStatus::Completed, chrono::Utc::now())
            .await,
        Err(CoreError::FlowNotFound(_))
    ));
}

#[tokio::test]
async fn unknown_persisted_step_type_is_reported() {
    let store = memory_store().await;
    let (flows, _) = store.create_repositories();
    let definition = flow("acme");
    flows.create_flow(&definition).await.unwrap();

    let steps = json!([{"id": "x1", "type": "webhook", "config": {}, "nextSteps": []}]);
    sqlx::query("UPDATE flows SET steps = ? WHERE id = ?")
        .bind(steps.to_string())
        .bind(&definition.id.0)
        .execute(store.connection().pool())
        .await
        .unwrap();

    let err = flows
        .find_by_id(&definition.id, &definition.tenant_id)
        .await
        .unwrap_err();
    assert_eq!(err, CoreError::UnknownStepType("x1".to_string()));
}

#[tokio::test]
async fn execution_is_finalized_once() {
    let store = memory_store().await;
    let (flows, executions) = store.create_repositories();
    let definition = flow("acme");
    flows.create_flow(&definition).await.unwrap();

    let mut execution = ExecutionRecord::start(&definition, ExecutionContext::new()).unwrap();
    executions.create_execution(&execution).await.unwrap();

    execution.context.insert("triggerExecuted", json!(true));
    execution
        .advance(StepId::from("t1"), Some(StepId::from("a1")))
        .unwrap();
    executions.update_transition(&execution).await.unwrap();

    execution.advance(StepId::from("a1"), None).unwrap();
    execution.complete().unwrap();
    executions.finalize_execution(&execution).await.unwrap();

    let stored = executions
        .find_by_id(&execution.id, &definition.tenant_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, ExecutionStatus::Completed);
    assert_eq!(stored.completed_steps, vec![StepId::from("t1"), StepId::from("a1")]);
    assert_eq!(stored.current_step_id, None);
    assert_eq!(stored.context, execution.context);
    assert_eq!(stored.execution_time_ms, execution.execution_time_ms);

    assert!(matches!(
        executions.finalize_execution(&execution).await,
        Err(CoreError::PersistenceError(_))
    ));
    assert!(matches!(
        executions.update_transition(&execution).await,
        Err(CoreError::PersistenceError(_))
    ));
}

#[tokio::test]
async fn update_of_unknown_execution_is_not_found() {
    let store = memory_store().await;
    let (_, executions) = store.create_repositories();
    let execution = ExecutionRecord::start(&flow("acme"), ExecutionContext::new()).unwrap();

    assert!(matches!(
        executions.update_transition(&execution).await,
        Err(CoreError::ExecutionNotFound(_))
    ));
}

#[tokio::test]
async fn resume_point_survives_reopening_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("stepflow.db").display());
    let definition = flow("acme");

    let execution_id = {
        let store = SqliteStateStoreProvider::with_config(SqliteConfig::new(url.clone()))
            .await
            .unwrap();
        let (flows, executions) = store.create_repositories();
        flows.create_flow(&definition).await.unwrap();

        let mut execution = ExecutionRecord::start(&definition, ExecutionContext::new()).unwrap();
        executions.create_execution(&execution).await.unwrap();
        execution
            .advance(StepId::from("t1"), Some(StepId::from("a1")))
            .unwrap();
        executions.update_transition(&execution).await.unwrap();

        store.connection().close().await;
        execution.id
    };

    let store = SqliteStateStoreProvider::with_config(SqliteConfig::new(url))
        .await
        .unwrap();
    let (flows, executions) = store.create_repositories();
    let stored = executions
        .find_by_id(&execution_id, &definition.tenant_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, ExecutionStatus::Running);
    assert_eq!(stored.current_step_id, Some(StepId::from("a1")));

    let service = FlowService::new(
        flows,
        executions,
        Arc::new(DefaultStepExecutor::default()),
        Arc::new(NoopEventHandler),
        EngineConfig::default(),
    );
    let resumed = service
        .resume_execution(&execution_id, &definition.tenant_id)
        .await
        .unwrap();
    assert_eq!(resumed.status, ExecutionStatus::Completed);
    assert_eq!(resumed.completed_steps, vec![StepId::from("t1"), StepId::from("a1")]);
}

#[tokio::test]
async fn engine_runs_against_sqlite() {
    let store = memory_store().await;
    let (flows, executions) = store.create_repositories();
    let service = FlowService::new(
        flows,
        executions,
        Arc::new(DefaultStepExecutor::default()),
        Arc::new(NoopEventHandler),
        EngineConfig::default(),
    );
    let tenant = TenantId::from("acme");

    let ok = service
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
    let record = service
        .execute_flow(&ok, &tenant, ExecutionContext::from_value(json!({"userId": "u1"})).unwrap())
        .await
        .unwrap();
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(service.get_execution(&record.id, &tenant).await.unwrap(), record);

    let broken = service
        .create_flow(&tenant, "broken", "", vec![StepSpec::new("t1", "trigger").then("ghost")])
        .await
        .unwrap();
    let err = service
        .execute_flow(&broken, &tenant, ExecutionContext::new())
        .await
        .unwrap_err();
    let failed = &service.list_executions(&broken, &tenant).await.unwrap()[0];
    assert_eq!(failed.status, ExecutionStatus::Failed);
    assert_eq!(failed.error, Some(err.to_string()));
    assert_eq!(failed.failed_step, Some(StepId::from("ghost")));

    let flow = service.get_flow(&ok, &tenant).await.unwrap();
    assert_eq!(flow.successful_executions, 1);
    assert_eq!(flow.last_execution_status, Some(ExecutionStatus::Completed));
}
