use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::NodeGroupId;

/// Top-level executor configuration, usually read from `tern.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TernConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub local_execution: LocalExecutionConfig,
    #[serde(default)]
    pub intermediate_results: IntermediateResultConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Group of this process. 0 marks the coordinator.
    pub local_group_id: i32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            local_group_id: NodeGroupId::COORDINATOR.0,
        }
    }
}

impl NodeConfig {
    pub fn local_group_id(&self) -> NodeGroupId {
        NodeGroupId(self.local_group_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalExecutionConfig {
    /// Run tasks whose placements live on this node in-process (default: true).
    pub enable_local_execution: bool,
    /// Log the text of every locally executed command.
    pub log_local_commands: bool,
    /// Log the text of every command sent to another node. Locally executed
    /// commands are still part of distributed execution, so this also
    /// enables local command logging.
    pub log_remote_commands: bool,
}

impl Default for LocalExecutionConfig {
    fn default() -> Self {
        Self {
            enable_local_execution: true,
            log_local_commands: false,
            log_remote_commands: false,
        }
    }
}

impl LocalExecutionConfig {
    pub fn should_log_local_commands(&self) -> bool {
        self.log_local_commands || self.log_remote_commands
    }
}

/// Default cap on a single intermediate result: 1 GiB.
pub const DEFAULT_MAX_INTERMEDIATE_RESULT_KB: i64 = 1_048_576;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntermediateResultConfig {
    /// Maximum size in kilobytes a single intermediate result may grow to.
    /// -1 disables the limit.
    pub max_intermediate_result_kb: i64,
    /// Maximum nesting of subplans materialized within one statement.
    pub max_subplan_depth: u32,
    /// Directory under which local copies of intermediate results are written.
    pub result_dir: String,
}

impl Default for IntermediateResultConfig {
    fn default() -> Self {
        Self {
            max_intermediate_result_kb: DEFAULT_MAX_INTERMEDIATE_RESULT_KB,
            max_subplan_depth: 64,
            result_dir: "tern_intermediate_results".into(),
        }
    }
}

impl IntermediateResultConfig {
    /// Size limit in bytes, or `None` when unlimited.
    /// Limits too large to express in bytes saturate at `u64::MAX`.
    pub fn max_result_bytes(&self) -> Option<u64> {
        u64::try_from(self.max_intermediate_result_kb)
            .ok()
            .map(|kb| kb.saturating_mul(1024))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Mask string literals in logged command text.
    pub redact_literals: bool,
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            redact_literals: false,
            filter: "info,tern=debug".into(),
        }
    }
}

impl TernConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: TernConfig = toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.intermediate_results.max_intermediate_result_kb < -1 {
            return Err(ConfigError::Invalid(format!(
                "max_intermediate_result_kb must be -1 or non-negative, got {}",
                self.intermediate_results.max_intermediate_result_kb
            )));
        }
        if self.intermediate_results.max_subplan_depth == 0 {
            return Err(ConfigError::Invalid(
                "max_subplan_depth must be at least 1".into(),
            ));
        }
        if self.node.local_group_id < 0 {
            return Err(ConfigError::Invalid(format!(
                "local_group_id must be non-negative, got {}",
                self.node.local_group_id
            )));
        }
        Ok(())
    }
}
