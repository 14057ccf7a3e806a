//! Distributor configuration

use crate::error::{DistributorError, Result};
use serde::{Deserialize, Serialize};

/// Settings shared by both distribution engines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DistributorConfig {
    /// Instance label, attached to every log line
    pub name: String,

    /// Emit a debug line with the elapsed milliseconds after each
    /// notification has been handled
    pub trace_timing: bool,

    /// Capacity of the failure sink built by `with_failure_recording()`
    /// (0 = unbounded)
    pub failure_capacity: usize,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            trace_timing: true,
            failure_capacity: 10_000,
        }
    }
}

impl DistributorConfig {
    /// Config with a custom instance name and default settings
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the settings are usable
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DistributorError::Config(
                "Distributor name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
