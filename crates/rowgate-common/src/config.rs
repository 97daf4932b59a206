//! Configuration management for RowGate

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading a configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Gate behaviour
    #[serde(default)]
    pub gate: GateConfig,

    /// Logging configuration
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Load configuration from a TOML or JSON file (chosen by extension)
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;

        if path.as_ref().extension().map_or(false, |ext| ext == "toml") {
            Self::from_toml_str(&content)
        } else {
            Ok(serde_json::from_str(&content)?)
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

/// What the gate does with a table that has no entry in the resolved policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingTablePolicy {
    /// Refuse the operation with a policy configuration error
    #[default]
    Deny,
    /// Treat the table as unrestricted
    Allow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Skip context schema validation (policies still see the raw context)
    pub disable_context_validation: bool,
    /// Accept validators that complete asynchronously
    pub async_validation: bool,
    /// Behaviour for tables absent from the policy table
    pub missing_table: MissingTablePolicy,
    /// Fail gate construction when a table known to the adapter has no policy
    pub require_full_coverage: bool,
    /// Raw-backed helpers whose shape is known and may be used while gated
    pub allowed_raw_helpers: Vec<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            disable_context_validation: false,
            async_validation: false,
            missing_table: MissingTablePolicy::Deny,
            require_full_coverage: true,
            allowed_raw_helpers: vec![
                "json_object_from".to_string(),
                "json_array_from".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Default filter directive when RUST_LOG is unset
    pub log_level: String,
    /// Emit JSON formatted logs
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
        }
    }
}
