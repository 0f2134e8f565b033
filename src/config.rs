use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::pipeline::StepSpec;

pub const CONFIG_FILE_NAME: &str = ".commit-gate.yaml";
pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GateConfig {
    pub version: u32,
    /// Re-stage files rewritten by fixup steps before the next check runs.
    #[serde(default = "default_restage")]
    pub restage: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_log: Option<PathBuf>,
    #[serde(default)]
    pub pre_commit: Vec<StepSpec>,
    #[serde(default = "default_commit_msg")]
    pub commit_msg: Vec<StepSpec>,
}

fn default_restage() -> bool {
    true
}

fn default_commit_msg() -> Vec<StepSpec> {
    vec![StepSpec::new("conventional")]
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            restage: true,
            audit_log: None,
            pre_commit: vec![
                StepSpec::new("staged-files"),
                StepSpec::new("format"),
                StepSpec::new("lint"),
                StepSpec::new("type-check"),
            ],
            commit_msg: default_commit_msg(),
        }
    }
}

impl GateConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: GateConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config YAML: {}", path.display()))?;
        Ok(config)
    }

    /// Explicit path first, then `.commit-gate.yaml` in `root`, then the
    /// built-in defaults.
    pub fn discover(explicit: Option<&Path>, root: &Path) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }
        let candidate = root.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Ok((Self::load(&candidate)?, Some(candidate)));
        }
        Ok((Self::default(), None))
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config")
    }

    /// Stable fingerprint recorded alongside bypass audit entries.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        let serialized = serde_json::to_vec(self).unwrap_or_default();
        hasher.update(serialized);
        format!("{:x}", hasher.finalize())
    }
}
