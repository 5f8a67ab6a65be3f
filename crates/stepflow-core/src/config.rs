//! Engine configuration
//!
//! Values come from defaults, optionally overridden by `STEPFLOW_*`
//! environment variables.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::warn;

use crate::CoreError;

/// Delay applied by delay steps that do not set `delayDuration`
pub const DEFAULT_DELAY_MS: u64 = 1000;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Delay for delay steps without an explicit duration, in milliseconds
    #[serde(default = "default_delay_ms")]
    pub default_delay_ms: u64,

    /// Upper bound on executions running in the background at once
    #[serde(default = "default_max_concurrent_executions")]
    pub max_concurrent_executions: usize,

    /// Events buffered per subscriber before slow subscribers start lagging
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

fn default_delay_ms() -> u64 {
    DEFAULT_DELAY_MS
}

fn default_max_concurrent_executions() -> usize {
    16
}

fn default_event_channel_capacity() -> usize {
    256
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_delay_ms: default_delay_ms(),
            max_concurrent_executions: default_max_concurrent_executions(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("STEPFLOW_DEFAULT_DELAY_MS") {
            match value.parse::<u64>() {
                Ok(ms) => config.default_delay_ms = ms,
                Err(_) => warn!("Invalid STEPFLOW_DEFAULT_DELAY_MS value: {}", value),
            }
        }

        if let Some(value) = lookup("STEPFLOW_MAX_CONCURRENT_EXECUTIONS") {
            match value.parse::<usize>() {
                Ok(max) => config.max_concurrent_executions = max,
                Err(_) => warn!("Invalid STEPFLOW_MAX_CONCURRENT_EXECUTIONS value: {}", value),
            }
        }

        if let Some(value) = lookup("STEPFLOW_EVENT_CHANNEL_CAPACITY") {
            match value.parse::<usize>() {
                Ok(capacity) => config.event_channel_capacity = capacity,
                Err(_) => warn!("Invalid STEPFLOW_EVENT_CHANNEL_CAPACITY value: {}", value),
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the values are usable
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.max_concurrent_executions == 0 {
            return Err(CoreError::ConfigurationError(
                "max_concurrent_executions must be at least 1".to_string(),
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(CoreError::ConfigurationError(
                "event_channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Default delay as a duration
    pub fn default_delay(&self) -> Duration {
        Duration::from_millis(self.default_delay_ms)
    }
}
