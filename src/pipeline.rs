use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::error::GateFailure;
use crate::message::CommitMessage;
use crate::observability::MetricsCollector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GateStage {
    PreCommit,
    CommitMsg,
}

impl GateStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateStage::PreCommit => "pre-commit",
            GateStage::CommitMsg => "commit-msg",
        }
    }
}

impl fmt::Display for GateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a check gets to look at. Paths in `staged_files` are relative to
/// `workdir`, which is the repository root.
#[derive(Debug, Clone)]
pub struct CheckContext {
    pub workdir: PathBuf,
    pub staged_files: Vec<PathBuf>,
    pub message: Option<CommitMessage>,
}

impl CheckContext {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            staged_files: Vec::new(),
            message: None,
        }
    }

    pub fn with_staged_files(mut self, files: Vec<PathBuf>) -> Self {
        self.staged_files = files;
        self
    }

    pub fn with_message(mut self, message: CommitMessage) -> Self {
        self.message = Some(message);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckStatus {
    Passed,
    Failed { exit_code: Option<i32> },
    Skipped(String),
}

#[derive(Debug, Clone)]
pub struct CheckOutput {
    pub status: CheckStatus,
    pub output: String,
    /// Files a fixup check was applied to.
    pub touched: Vec<PathBuf>,
}

impl CheckOutput {
    pub fn passed(output: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Passed,
            output: output.into(),
            touched: Vec::new(),
        }
    }

    pub fn failed(exit_code: Option<i32>, output: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Failed { exit_code },
            output: output.into(),
            touched: Vec::new(),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Skipped(reason.into()),
            output: String::new(),
            touched: Vec::new(),
        }
    }
}

pub type StepParameters = Map<String, Value>;

pub trait Check: Send + Sync {
    fn name(&self) -> &str;
    fn failure_message(&self) -> &str;
    fn remedy(&self) -> Option<&str> {
        None
    }
    /// Fixup checks rewrite files in the working tree.
    fn modifies_worktree(&self) -> bool {
        false
    }
    fn requires_message(&self) -> bool {
        false
    }
    fn run(&self, ctx: &CheckContext) -> Result<CheckOutput>;
}

/// Puts files rewritten by a fixup check back into the index.
pub trait Restage: Send + Sync {
    fn restage(&self, files: &[PathBuf]) -> Result<()>;
}

type CheckConstructor = Arc<dyn Fn(StepParameters) -> Result<Box<dyn Check>> + Send + Sync>;

pub struct CheckRegistry {
    factories: HashMap<String, CheckConstructor>,
}

impl Default for CheckRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, constructor: F)
    where
        F: Fn(StepParameters) -> Result<Box<dyn Check>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(constructor));
    }

    pub fn create(&self, kind: &str, params: StepParameters) -> Result<Box<dyn Check>> {
        let factory = self.factories.get(kind).ok_or_else(|| {
            anyhow!(
                "Unknown check '{}'. Available checks: {}",
                kind,
                self.known_checks().join(", ")
            )
        })?;
        factory(params)
    }

    pub fn known_checks(&self) -> Vec<String> {
        let mut names: Vec<_> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub step_name: String,
    pub succeeded: bool,
    pub skipped: bool,
    pub output: String,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub stage: GateStage,
    pub results: Vec<PipelineResult>,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn executed(&self) -> impl Iterator<Item = &PipelineResult> {
        self.results.iter().filter(|r| !r.skipped)
    }

    pub fn skipped_count(&self) -> usize {
        self.results.iter().filter(|r| r.skipped).count()
    }
}

pub struct PipelineExecutor {
    steps: Vec<Box<dyn Check>>,
    metrics: MetricsCollector,
    restager: Option<Box<dyn Restage>>,
}

impl PipelineExecutor {
    pub fn new(steps: Vec<Box<dyn Check>>, metrics: MetricsCollector) -> Self {
        Self {
            steps,
            metrics,
            restager: None,
        }
    }

    pub fn with_restager(mut self, restager: Box<dyn Restage>) -> Self {
        self.restager = Some(restager);
        self
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn metrics(&self) -> MetricsCollector {
        self.metrics.clone()
    }

    /// Runs every step in order and stops at the first one that fails.
    #[instrument(skip_all, fields(stage = stage.as_str()))]
    pub fn execute(&self, stage: GateStage, ctx: &CheckContext) -> Result<RunReport, GateFailure> {
        let started = Instant::now();
        let mut results = Vec::with_capacity(self.steps.len());

        for step in &self.steps {
            let span = tracing::span!(tracing::Level::DEBUG, "step", step = step.name());
            let _span_guard = span.enter();
            let timer = self.metrics.start_step(step.name());

            info!(step = step.name(), "Running check");
            let outcome = match step.run(ctx) {
                Ok(outcome) => outcome,
                Err(err) => {
                    drop(timer);
                    self.metrics.record_step_failure(step.name());
                    self.metrics.record_stage_failure(stage);
                    return Err(GateFailure::new(step.name(), step.failure_message())
                        .with_remedy(step.remedy().map(str::to_string))
                        .with_output(format!("{err:#}")));
                }
            };
            let duration_ms = timer.finish();

            match outcome.status {
                CheckStatus::Passed => {
                    self.metrics.record_step_pass(step.name());
                    if step.modifies_worktree() {
                        self.restage(step.as_ref(), &outcome.touched, stage)?;
                    }
                    debug!(step = step.name(), duration_ms, "Check passed");
                    results.push(PipelineResult {
                        step_name: step.name().to_string(),
                        succeeded: true,
                        skipped: false,
                        output: outcome.output,
                        exit_code: Some(0),
                        duration_ms,
                    });
                }
                CheckStatus::Skipped(reason) => {
                    self.metrics.record_step_skip(step.name());
                    info!(step = step.name(), %reason, "Check skipped");
                    results.push(PipelineResult {
                        step_name: step.name().to_string(),
                        succeeded: true,
                        skipped: true,
                        output: reason,
                        exit_code: None,
                        duration_ms,
                    });
                }
                CheckStatus::Failed { exit_code } => {
                    self.metrics.record_step_failure(step.name());
                    self.metrics.record_stage_failure(stage);
                    warn!(step = step.name(), ?exit_code, "Check failed");
                    return Err(GateFailure::new(step.name(), step.failure_message())
                        .with_remedy(step.remedy().map(str::to_string))
                        .with_output(outcome.output)
                        .with_exit_code(exit_code));
                }
            }
        }

        let elapsed = started.elapsed();
        self.metrics.record_stage_pass(stage, elapsed);
        Ok(RunReport {
            stage,
            results,
            duration_ms: elapsed.as_millis() as u64,
        })
    }

    fn restage(
        &self,
        step: &dyn Check,
        files: &[PathBuf],
        stage: GateStage,
    ) -> Result<(), GateFailure> {
        let Some(restager) = &self.restager else {
            return Ok(());
        };
        if files.is_empty() {
            return Ok(());
        }
        restager.restage(files).map_err(|err| {
            self.metrics.record_stage_failure(stage);
            GateFailure::new(
                step.name(),
                "Failed to re-stage files rewritten by the fixup step",
            )
            .with_output(format!("{err:#}"))
        })
    }
}

pub fn build_pipeline(
    registry: &CheckRegistry,
    specs: &[StepSpec],
    metrics: MetricsCollector,
) -> Result<PipelineExecutor> {
    let mut steps = Vec::with_capacity(specs.len());
    for spec in specs {
        let params = spec.params.clone().unwrap_or_default();
        let step = registry.create(&spec.check, params)?;
        steps.push(step);
    }
    Ok(PipelineExecutor::new(steps, metrics))
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StepSpec {
    pub check: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<StepParameters>,
}

impl StepSpec {
    pub fn new(check: impl Into<String>) -> Self {
        Self {
            check: check.into(),
            params: None,
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params
            .get_or_insert_with(StepParameters::new)
            .insert(key.to_string(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Static {
        name: &'static str,
        status: CheckStatus,
    }

    impl Check for Static {
        fn name(&self) -> &str {
            self.name
        }

        fn failure_message(&self) -> &str {
            "static failure"
        }

        fn run(&self, _ctx: &CheckContext) -> Result<CheckOutput> {
            Ok(CheckOutput {
                status: self.status.clone(),
                output: String::new(),
                touched: Vec::new(),
            })
        }
    }

    #[test]
    fn unknown_check_lists_available_ones() {
        let mut registry = CheckRegistry::new();
        registry.register("lint", |_| {
            Ok(Box::new(Static {
                name: "lint",
                status: CheckStatus::Passed,
            }))
        });
        let err = registry
            .create("flake8", StepParameters::new())
            .err()
            .expect("unknown check should fail");
        let message = err.to_string();
        assert!(message.contains("flake8"));
        assert!(message.contains("lint"));
    }

    #[test]
    fn skipped_steps_count_as_success() {
        let executor = PipelineExecutor::new(
            vec![
                Box::new(Static {
                    name: "staged-files",
                    status: CheckStatus::Skipped("no matching files".into()),
                }),
                Box::new(Static {
                    name: "lint",
                    status: CheckStatus::Passed,
                }),
            ],
            MetricsCollector::new(),
        );
        let report = executor
            .execute(GateStage::PreCommit, &CheckContext::new("."))
            .expect("pipeline passes");
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.skipped_count(), 1);
        assert_eq!(report.executed().count(), 1);
    }

    #[test]
    fn step_spec_builder_collects_params() {
        let spec = StepSpec::new("command")
            .with_param("name", "audit")
            .with_param("command", vec!["npm", "audit"]);
        let params = spec.params.expect("params set");
        assert_eq!(params.get("name").and_then(Value::as_str), Some("audit"));
        assert!(params.get("command").and_then(Value::as_array).is_some());
    }
}
