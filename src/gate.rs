//! The two git lifecycle gates: before a commit is recorded and when its
//! message is finalized. Each invocation is independent; nothing is carried
//! between runs.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{error, info, warn};

use crate::audit::{AuditLog, BypassRecord, BypassSource};
use crate::config::GateConfig;
use crate::error::GateFailure;
use crate::message::CommitMessage;
use crate::observability::MetricsCollector;
use crate::pipeline::{
    CheckContext, CheckRegistry, GateStage, PipelineExecutor, Restage, RunReport, build_pipeline,
};

pub const COMMIT_MSG_STEP: &str = "commit-msg";

#[derive(Debug, Clone)]
pub enum GateOutcome {
    Passed(RunReport),
    /// Verification was skipped on operator request. Not a pass.
    Bypassed(BypassRecord),
}

impl GateOutcome {
    pub fn is_bypassed(&self) -> bool {
        matches!(self, GateOutcome::Bypassed(_))
    }
}

pub struct CommitGate {
    pre_commit: PipelineExecutor,
    commit_msg: PipelineExecutor,
    workdir: PathBuf,
    metrics: MetricsCollector,
    audit: Option<AuditLog>,
    config_digest: Option<String>,
}

impl CommitGate {
    pub fn new(
        pre_commit: PipelineExecutor,
        commit_msg: PipelineExecutor,
        workdir: impl Into<PathBuf>,
    ) -> Self {
        let metrics = pre_commit.metrics();
        Self {
            pre_commit,
            commit_msg,
            workdir: workdir.into(),
            metrics,
            audit: None,
            config_digest: None,
        }
    }

    pub fn from_config(
        config: &GateConfig,
        registry: &CheckRegistry,
        workdir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let metrics = MetricsCollector::new();
        let pre_commit = build_pipeline(registry, &config.pre_commit, metrics.clone())?;
        let commit_msg = build_pipeline(registry, &config.commit_msg, metrics)?;
        let mut gate = Self::new(pre_commit, commit_msg, workdir);
        gate.config_digest = Some(config.digest());
        Ok(gate)
    }

    pub fn with_restager(mut self, restager: Box<dyn Restage>) -> Self {
        self.pre_commit = self.pre_commit.with_restager(restager);
        self
    }

    pub fn with_audit_log(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn metrics(&self) -> MetricsCollector {
        self.metrics.clone()
    }

    pub fn pre_commit_steps(&self) -> Vec<&str> {
        self.pre_commit.step_names()
    }

    pub fn commit_msg_steps(&self) -> Vec<&str> {
        self.commit_msg.step_names()
    }

    pub fn run_pre_commit(
        &self,
        staged_files: &[PathBuf],
        bypass: Option<BypassSource>,
    ) -> Result<GateOutcome, GateFailure> {
        if let Some(source) = bypass {
            return Ok(self.bypass(GateStage::PreCommit, source));
        }

        if self.pre_commit.is_empty() {
            warn!("No pre-commit checks configured; nothing will be verified");
        }
        info!(
            staged = staged_files.len(),
            steps = self.pre_commit.step_names().len(),
            "Running pre-commit checks"
        );
        let ctx = CheckContext::new(&self.workdir).with_staged_files(staged_files.to_vec());
        let report = self.pre_commit.execute(GateStage::PreCommit, &ctx)?;
        Ok(GateOutcome::Passed(report))
    }

    pub fn run_commit_msg_check(
        &self,
        message_path: &Path,
        bypass: Option<BypassSource>,
    ) -> Result<GateOutcome, GateFailure> {
        if let Some(source) = bypass {
            return Ok(self.bypass(GateStage::CommitMsg, source));
        }

        let message = CommitMessage::load(message_path).map_err(|err| {
            self.metrics.record_stage_failure(GateStage::CommitMsg);
            GateFailure::new(COMMIT_MSG_STEP, "Commit message could not be read")
                .with_output(format!("{err:#}"))
        })?;
        info!(message_file = %message_path.display(), "Validating commit message");
        let ctx = CheckContext::new(&self.workdir).with_message(message);
        let report = self.commit_msg.execute(GateStage::CommitMsg, &ctx)?;
        Ok(GateOutcome::Passed(report))
    }

    fn bypass(&self, stage: GateStage, source: BypassSource) -> GateOutcome {
        GateOutcome::Bypassed(record_bypass(
            stage,
            source,
            self.config_digest.clone(),
            self.audit.as_ref(),
            &self.metrics,
        ))
    }
}

/// Logs, counts and audits a skipped stage. Audit write failures are logged
/// and never turn the bypass into a failure.
pub fn record_bypass(
    stage: GateStage,
    source: BypassSource,
    config_digest: Option<String>,
    audit: Option<&AuditLog>,
    metrics: &MetricsCollector,
) -> BypassRecord {
    let mut record = BypassRecord::new(stage, source);
    if let Some(digest) = config_digest {
        record = record.with_config_digest(digest);
    }

    warn!(
        stage = stage.as_str(),
        source = source.describe(),
        user = record.user.as_deref().unwrap_or("unknown"),
        "Verification BYPASSED; no checks were run"
    );
    metrics.record_bypass(stage);

    if let Some(audit) = audit
        && let Err(err) = audit.append(&record)
    {
        error!(
            audit_log = %audit.path().display(),
            "Failed to record bypass in audit log: {err:#}"
        );
    }

    record
}
