//! Append-only record of verification bypasses.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::GateStage;

pub const SKIP_ENV_VAR: &str = "COMMIT_GATE_SKIP";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BypassSource {
    /// `--no-verify` on the command line.
    Flag,
    /// `COMMIT_GATE_SKIP` in the environment.
    Environment,
}

impl BypassSource {
    pub fn describe(&self) -> &'static str {
        match self {
            BypassSource::Flag => "--no-verify flag",
            BypassSource::Environment => "COMMIT_GATE_SKIP environment variable",
        }
    }

    /// Resolve the bypass request for this invocation, if any.
    pub fn detect(flag: bool) -> Option<Self> {
        if flag {
            return Some(BypassSource::Flag);
        }
        std::env::var(SKIP_ENV_VAR)
            .ok()
            .filter(|value| is_truthy(value))
            .map(|_| BypassSource::Environment)
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BypassRecord {
    pub timestamp: DateTime<Utc>,
    pub stage: GateStage,
    pub source: BypassSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_digest: Option<String>,
}

impl BypassRecord {
    pub fn new(stage: GateStage, source: BypassSource) -> Self {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .ok()
            .filter(|user| !user.is_empty());
        Self {
            timestamp: Utc::now(),
            stage,
            source,
            user,
            config_digest: None,
        }
    }

    pub fn with_config_digest(mut self, digest: impl Into<String>) -> Self {
        self.config_digest = Some(digest.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<git-dir>/commit-gate/audit.jsonl`
    pub fn in_git_dir(git_dir: &Path) -> Self {
        Self::new(git_dir.join("commit-gate").join("audit.jsonl"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &BypassRecord) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create audit log directory: {}", parent.display())
            })?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open audit log: {}", self.path.display()))?;
        let line = serde_json::to_string(record)?;
        writeln!(file, "{line}")
            .with_context(|| format!("Failed to write audit log: {}", self.path.display()))?;
        Ok(())
    }

    pub fn read(&self) -> Result<Vec<BypassRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&self.path)
            .with_context(|| format!("Failed to open audit log: {}", self.path.display()))?;
        let mut records = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line).with_context(|| {
                format!(
                    "Malformed audit entry at {}:{}",
                    self.path.display(),
                    idx + 1
                )
            })?;
            records.push(record);
        }
        Ok(records)
    }
}
