//! Flow files: a flow definition authored as YAML or JSON.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use stepflow_core::{CoreError, FlowDefinition, StepDefinition, StepSpec, TenantId};

/// A flow as written on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowFile {
    /// Flow name
    pub name: String,
    /// Optional description
    #[serde(default)]
    pub description: String,
    /// Steps in authoring order; the first one is the entry point
    pub steps: Vec<StepSpec>,
}

impl FlowFile {
    /// Read a flow file, picking the format from the extension
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read flow file {}", path.display()))?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        let parsed = match extension.as_deref() {
            Some("json") => Self::from_json(&raw),
            Some("yaml") | Some("yml") => Self::from_yaml(&raw),
            _ => bail!(
                "Unsupported flow file extension for {} (expected .yaml, .yml or .json)",
                path.display()
            ),
        };

        parsed.with_context(|| format!("Invalid flow file {}", path.display()))
    }

    /// Parse YAML text
    pub fn from_yaml(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Parse JSON text
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Build the definition `run` would store, without storing it
    ///
    /// Applies the same checks as flow creation: at least one step, known
    /// step types and unique step ids.
    pub fn check(&self, tenant_id: &TenantId) -> Result<FlowDefinition> {
        if self.steps.is_empty() {
            return Err(CoreError::EmptyFlowDefinition(self.name.clone()).into());
        }

        let steps = self
            .steps
            .iter()
            .cloned()
            .map(StepDefinition::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        let flow = FlowDefinition::new(tenant_id.clone(), &self.name, &self.description, steps);
        flow.validate()?;
        Ok(flow)
    }
}
