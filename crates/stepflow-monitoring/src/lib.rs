//! Observability setup for Stepflow.
//!
//! Installs the process-wide `tracing` subscriber used by the binaries.
//! Libraries only emit events; they never install a subscriber themselves.

use serde::{Deserialize, Serialize};
use std::env;

pub mod logging;

pub use logging::{init_logging, LogExt};

/// Output format of the log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, multi-line output for development
    Pretty,
    /// One JSON object per line for log aggregation
    Json,
}

impl LogFormat {
    /// Parse a format name, case-insensitively
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Some(LogFormat::Pretty),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Configuration for initializing logging
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Service name attached to the startup event
    pub service_name: String,
    /// Log level filter (e.g., "info,stepflow_core=debug"); `RUST_LOG` wins when set
    pub log_filter: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            service_name: "stepflow".to_string(),
            log_filter: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl MonitoringConfig {
    /// Load from `STEPFLOW_LOG_FILTER` and `STEPFLOW_LOG_FORMAT` on top of the defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(filter) = lookup("STEPFLOW_LOG_FILTER") {
            config.log_filter = filter;
        }

        // No subscriber is installed yet, so an invalid value cannot be logged
        if let Some(format) = lookup("STEPFLOW_LOG_FORMAT").as_deref().and_then(LogFormat::parse) {
            config.format = format;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = MonitoringConfig::from_lookup(|_| None);
        assert_eq!(config, MonitoringConfig::default());
        assert_eq!(config.service_name, "stepflow");
        assert_eq!(config.format, LogFormat::Pretty);
    }

    #[test]
    fn test_config_from_lookup() {
        let config = MonitoringConfig::from_lookup(|key| match key {
            "STEPFLOW_LOG_FILTER" => Some("debug".to_string()),
            "STEPFLOW_LOG_FORMAT" => Some("JSON".to_string()),
            _ => None,
        });
        assert_eq!(config.log_filter, "debug");
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn test_unknown_format_keeps_default() {
        let config = MonitoringConfig::from_lookup(|key| {
            (key == "STEPFLOW_LOG_FORMAT").then(|| "xml".to_string())
        });
        assert_eq!(config.format, LogFormat::Pretty);
    }
}
