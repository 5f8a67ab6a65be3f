//! Structured logging using tracing.
//!
//! Log lines go to stderr so that command output on stdout stays parseable.

use anyhow::Context;
use std::io;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{LogFormat, MonitoringConfig};

/// Initialize structured logging
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(config: &MonitoringConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .with_context(|| format!("Invalid log filter '{}'", config.log_filter))?;

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_writer(io::stderr),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_writer(io::stderr),
            )
            .try_init(),
    };
    installed.context("Failed to set global default subscriber")?;

    info!(
        service_name = %config.service_name,
        log_format = ?config.format,
        "Logging initialized"
    );

    Ok(())
}

/// Trait to add log context to results
pub trait LogExt<T, E> {
    /// Log error with additional context before returning
    fn log_err(self, message: &str) -> Result<T, E>;
}

impl<T, E: std::fmt::Display> LogExt<T, E> for Result<T, E> {
    fn log_err(self, message: &str) -> Result<T, E> {
        if let Err(ref e) = self {
            tracing::error!(error = %e, "{}", message);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_is_rejected() {
        // RUST_LOG would take precedence over the configured filter
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = MonitoringConfig {
            log_filter: "info,stepflow_core=loudest".to_string(),
            ..MonitoringConfig::default()
        };
        assert!(init_logging(&config).is_err());
    }

    #[test]
    fn test_log_err_passes_result_through() {
        let ok: Result<u8, String> = Ok(1);
        assert_eq!(ok.log_err("unused"), Ok(1));

        let err: Result<u8, String> = Err("boom".to_string());
        assert_eq!(err.log_err("step failed"), Err("boom".to_string()));
    }
}
