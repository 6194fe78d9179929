//! Service configuration with defaults
use super::project::COMPLETED_STATUS;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What to do when the completion status cannot be resolved at the moment a chain completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingStatusPolicy {
    /// Complete the chain and leave the project status untouched, with a warning.
    #[default]
    Skip,
    /// Reject the final approval and write nothing.
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Name of the project status applied when the last approver signs off.
    pub completed_status: String,
    pub missing_status_policy: MissingStatusPolicy,
    pub db_path: PathBuf,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            completed_status: COMPLETED_STATUS.to_string(),
            missing_status_policy: MissingStatusPolicy::default(),
            db_path: PathBuf::from("approval-chain.db"),
        }
    }
}

/// Load configuration from a JSON file, falling back to defaults when the file doesn't exist.
/// Fields missing from the file keep their default value.
pub fn load_config(path: &Path) -> anyhow::Result<ChainConfig> {
    if !path.exists() {
        return Ok(ChainConfig::default());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config = serde_json::from_str(&contents)
        .with_context(|| format!("invalid config file {}", path.display()))?;

    Ok(config)
}
