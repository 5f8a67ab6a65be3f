use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use stepflow_core::CoreError;
use tracing::{debug, info};

use crate::migrations;

/// Configuration for the SQLite connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Database URL, e.g. `sqlite://stepflow.db` or `sqlite::memory:`
    pub database_url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Timeout for acquiring a connection from the pool (in seconds)
    pub acquire_timeout_secs: u64,

    /// Whether to run migrations on connect
    pub run_migrations: bool,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://stepflow.db".to_string(),
            max_connections: 5,
            acquire_timeout_secs: 30,
            run_migrations: true,
        }
    }
}

impl SqliteConfig {
    /// Configuration for the given database URL with default pool settings
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Default::default()
        }
    }

    fn is_in_memory(&self) -> bool {
        self.database_url.contains(":memory:") || self.database_url.contains("mode=memory")
    }
}

/// Database connection manager for SQLite
#[derive(Clone, Debug)]
pub struct SqliteConnection {
    pub(crate) pool: SqlitePool,
}

impl SqliteConnection {
    /// Open the pool and, if configured, apply the migrations
    pub async fn new(config: &SqliteConfig) -> Result<Self, CoreError> {
        if !config.database_url.starts_with("sqlite:") {
            return Err(CoreError::ConfigurationError(format!(
                "Expected a sqlite: URL, got '{}'",
                config.database_url
            )));
        }

        let options = SqliteConnectOptions::from_str(&config.database_url)
            .map_err(|e| {
                CoreError::ConfigurationError(format!(
                    "Invalid SQLite URL '{}': {}",
                    config.database_url, e
                ))
            })?
            .create_if_missing(true)
            .foreign_keys(true);

        let mut pool_options = SqlitePoolOptions::new()
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs));

        // Every connection to `:memory:` opens its own database, so keep exactly one alive
        pool_options = if config.is_in_memory() {
            pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            pool_options.max_connections(config.max_connections.max(1))
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| CoreError::PersistenceError(format!("Failed to connect to database: {}", e)))?;

        debug!(url = %config.database_url, "Connected to SQLite database");

        let conn = Self { pool };
        if config.run_migrations {
            conn.run_migrations().await?;
        }

        Ok(conn)
    }

    /// Apply the schema migrations
    pub async fn run_migrations(&self) -> Result<(), CoreError> {
        info!("Running database migrations");

        for (name, sql) in migrations::generate_migrations() {
            debug!(migration = name, "Applying migration");
            sqlx::raw_sql(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    CoreError::PersistenceError(format!("Migration '{}' failed: {}", name, e))
                })?;
        }

        info!("Migrations completed successfully");
        Ok(())
    }

    /// Get a reference to the database pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
