//! Stepflow CLI - run flow files against the engine
//!
//! Commands:
//! - `run`: create a flow from a YAML/JSON file and execute it
//! - `validate`: check a flow file without running it
//! - `flows`, `executions`, `execution`: inspect a SQLite store
//! - `resume`: continue an interrupted execution from a SQLite store

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stepflow_core::domain::repository::memory::{MemoryExecutionRepository, MemoryFlowRepository};
use stepflow_core::{
    DefaultStepExecutor, EngineConfig, ExecutionContext, ExecutionId, ExecutionRepository,
    FlowId, FlowRepository, FlowService, NoopEventHandler, TenantId,
};
use stepflow_monitoring::{LogExt, MonitoringConfig};
use stepflow_state_sqlite::SqliteStateStoreProvider;
use tracing::info;

mod flow_file;

use flow_file::FlowFile;

/// Stepflow CLI application
#[derive(Parser)]
#[command(name = "stepflow")]
#[command(about = "Stepflow - tenant-scoped workflow runner", long_about = None)]
#[command(version)]
struct Cli {
    /// Tenant that owns the flows and executions
    #[arg(short, long, env = "STEPFLOW_TENANT", default_value = "default")]
    tenant: String,

    /// SQLite database URL; flows and executions are kept in memory when unset
    #[arg(short, long, env = "STEPFLOW_DATABASE_URL")]
    database: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Create a flow from a file and execute it once
    Run {
        /// Flow file (.yaml, .yml or .json)
        file: PathBuf,

        /// Seed context as a JSON object
        #[arg(short, long, default_value = "{}")]
        context: String,
    },

    /// Check a flow file without running it
    Validate {
        /// Flow file (.yaml, .yml or .json)
        file: PathBuf,
    },

    /// List the tenant's flows
    Flows,

    /// List the executions of a flow
    Executions {
        /// Flow id
        flow_id: String,
    },

    /// Show one execution record
    Execution {
        /// Execution id
        execution_id: String,
    },

    /// Continue a running execution from its last persisted step
    Resume {
        /// Execution id
        execution_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut monitoring = MonitoringConfig::from_env();
    monitoring.service_name = "stepflow-cli".to_string();
    if cli.verbose {
        monitoring.log_filter = "debug".to_string();
    }
    stepflow_monitoring::init_logging(&monitoring).context("Failed to initialize logging")?;

    let config = EngineConfig::from_env().context("Failed to load configuration")?;
    let tenant = TenantId(cli.tenant.clone());

    let service = build_service(cli.database.as_deref(), config).await?;

    match cli.command {
        Commands::Run { file, context } => run(&service, &tenant, &file, &context).await,
        Commands::Validate { file } => validate(&file, &tenant),
        Commands::Flows => {
            require_database(&cli.database)?;
            print_json(&service.list_flows(&tenant).await?)
        }
        Commands::Executions { flow_id } => {
            require_database(&cli.database)?;
            print_json(&service.list_executions(&FlowId(flow_id), &tenant).await?)
        }
        Commands::Execution { execution_id } => {
            require_database(&cli.database)?;
            print_json(&service.get_execution(&ExecutionId(execution_id), &tenant).await?)
        }
        Commands::Resume { execution_id } => {
            require_database(&cli.database)?;
            let record = service
                .resume_execution(&ExecutionId(execution_id), &tenant)
                .await
                .log_err("Resumed execution failed")?;
            print_json(&record)
        }
    }
}

async fn build_service(database: Option<&str>, config: EngineConfig) -> Result<FlowService> {
    let (flows, executions): (Arc<dyn FlowRepository>, Arc<dyn ExecutionRepository>) =
        match database {
            Some(url) => SqliteStateStoreProvider::new(url)
                .await
                .with_context(|| format!("Failed to open state store at {}", url))?
                .create_repositories(),
            None => (
                Arc::new(MemoryFlowRepository::new()),
                Arc::new(MemoryExecutionRepository::new()),
            ),
        };

    Ok(FlowService::new(
        flows,
        executions,
        Arc::new(DefaultStepExecutor::new(&config)),
        Arc::new(NoopEventHandler),
        config,
    ))
}

async fn run(service: &FlowService, tenant: &TenantId, file: &Path, context: &str) -> Result<()> {
    let flow = FlowFile::load(file)?;
    let seed: serde_json::Value =
        serde_json::from_str(context).context("--context must be a JSON object")?;
    let seed = ExecutionContext::from_value(seed)?;

    let flow_id = service
        .create_flow(tenant, &flow.name, &flow.description, flow.steps)
        .await
        .context("Failed to create flow")?;
    info!(flow_id = %flow_id, "Running flow");

    match service.execute_flow(&flow_id, tenant, seed).await {
        Ok(record) => print_json(&record),
        Err(e) => {
            // The failed record is already stored; show it before reporting the error
            if let Ok(records) = service.list_executions(&flow_id, tenant).await {
                if let Some(record) = records.last() {
                    print_json(record)?;
                }
            }
            Err(e).context("Execution failed")
        }
    }
}

fn validate(file: &Path, tenant: &TenantId) -> Result<()> {
    let flow = FlowFile::load(file)?;
    let definition = flow
        .check(tenant)
        .with_context(|| format!("Flow '{}' is invalid", flow.name))?;
    println!("Flow '{}' is valid ({} steps)", definition.name, definition.steps.len());
    Ok(())
}

fn require_database(database: &Option<String>) -> Result<()> {
    if database.is_none() {
        bail!("This command needs a persistent store; pass --database or set STEPFLOW_DATABASE_URL");
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
