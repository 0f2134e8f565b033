use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use commit_gate::audit::{AuditLog, BypassSource};
use commit_gate::checks;
use commit_gate::config::GateConfig;
use commit_gate::gate::{COMMIT_MSG_STEP, CommitGate, GateOutcome};
use commit_gate::observability::MetricsCollector;
use commit_gate::pipeline::{
    Check, CheckContext, CheckOutput, CheckRegistry, GateStage, PipelineExecutor, StepSpec,
};
use tempfile::tempdir;

type CallLog = Arc<Mutex<Vec<String>>>;

struct Recording {
    name: &'static str,
    pass: bool,
    calls: CallLog,
}

impl Check for Recording {
    fn name(&self) -> &str {
        self.name
    }

    fn failure_message(&self) -> &str {
        "check reported problems"
    }

    fn run(&self, _ctx: &CheckContext) -> Result<CheckOutput> {
        self.calls.lock().unwrap().push(self.name.to_string());
        Ok(if self.pass {
            CheckOutput::passed("")
        } else {
            CheckOutput::failed(Some(1), "problems")
        })
    }
}

fn recording_gate(workdir: &Path, failing: Option<&str>, calls: &CallLog) -> CommitGate {
    let metrics = MetricsCollector::new();
    let steps: Vec<Box<dyn Check>> = ["staged-files", "format", "lint", "type-check"]
        .into_iter()
        .map(|name| {
            Box::new(Recording {
                name,
                pass: Some(name) != failing,
                calls: calls.clone(),
            }) as Box<dyn Check>
        })
        .collect();
    let pre_commit = PipelineExecutor::new(steps, metrics.clone());
    let commit_msg = PipelineExecutor::new(Vec::new(), metrics);
    CommitGate::new(pre_commit, commit_msg, workdir)
}

fn default_gate(workdir: &Path) -> CommitGate {
    let mut registry = CheckRegistry::new();
    checks::register_defaults(&mut registry);
    CommitGate::from_config(&GateConfig::default(), &registry, workdir).unwrap()
}

fn write_message(dir: &Path, text: &str) -> PathBuf {
    let path = dir.join("COMMIT_EDITMSG");
    fs::write(&path, text).unwrap();
    path
}

#[test]
fn clean_pre_commit_runs_all_four_steps() {
    let temp = tempdir().unwrap();
    let calls = CallLog::default();
    let gate = recording_gate(temp.path(), None, &calls);

    let outcome = gate
        .run_pre_commit(&[PathBuf::from("src/index.ts")], None)
        .expect("all checks pass");

    assert!(matches!(outcome, GateOutcome::Passed(_)));
    assert_eq!(
        *calls.lock().unwrap(),
        ["staged-files", "format", "lint", "type-check"]
    );
}

#[test]
fn format_failure_never_reaches_lint_or_type_check() {
    let temp = tempdir().unwrap();
    let calls = CallLog::default();
    let gate = recording_gate(temp.path(), Some("format"), &calls);

    let failure = gate
        .run_pre_commit(&[PathBuf::from("src/index.ts")], None)
        .expect_err("format fails");

    assert_eq!(failure.step, "format");
    assert_eq!(*calls.lock().unwrap(), ["staged-files", "format"]);
}

#[test]
fn bypass_skips_every_check_and_is_audited() {
    let temp = tempdir().unwrap();
    let calls = CallLog::default();
    let log = AuditLog::new(temp.path().join("audit.jsonl"));
    let gate = recording_gate(temp.path(), Some("format"), &calls).with_audit_log(log.clone());

    let outcome = gate
        .run_pre_commit(&[PathBuf::from("a.ts")], Some(BypassSource::Flag))
        .expect("bypass never fails");

    assert!(outcome.is_bypassed());
    assert!(calls.lock().unwrap().is_empty());

    let records = log.read().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].stage, GateStage::PreCommit);
    assert_eq!(records[0].source, BypassSource::Flag);
    assert_eq!(gate.metrics().snapshot().stages["pre-commit"].bypasses, 1);
}

#[test]
fn bypass_is_distinct_from_a_pass() {
    let temp = tempdir().unwrap();
    let gate = default_gate(temp.path());
    let message = write_message(temp.path(), "not conventional at all\n");

    let outcome = gate
        .run_commit_msg_check(&message, Some(BypassSource::Environment))
        .expect("bypass never fails");

    match outcome {
        GateOutcome::Bypassed(record) => {
            assert_eq!(record.stage, GateStage::CommitMsg);
            assert_eq!(record.source, BypassSource::Environment);
            assert!(record.config_digest.is_some());
        }
        GateOutcome::Passed(_) => panic!("bypass must not be reported as a pass"),
    }
}

#[test]
fn repeated_runs_give_identical_results() {
    let temp = tempdir().unwrap();
    let mut registry = CheckRegistry::new();
    checks::register_defaults(&mut registry);
    let config = GateConfig {
        pre_commit: vec![
            StepSpec::new("format").with_param("command", vec!["true"]),
            StepSpec::new("lint").with_param("command", vec!["true"]),
        ],
        ..GateConfig::default()
    };
    let gate = CommitGate::from_config(&config, &registry, temp.path()).unwrap();

    for _ in 0..3 {
        match gate.run_pre_commit(&[], None).expect("passes every time") {
            GateOutcome::Passed(report) => assert_eq!(report.results.len(), 2),
            GateOutcome::Bypassed(_) => panic!("not bypassed"),
        }
    }
    let snapshot = gate.metrics().snapshot();
    assert_eq!(snapshot.stages["pre-commit"].passes, 3);
    assert_eq!(snapshot.steps["lint"].calls, 3);
}

#[test]
fn conventional_message_is_accepted() {
    let temp = tempdir().unwrap();
    let gate = default_gate(temp.path());
    let message = write_message(temp.path(), "feat: add new feature\n");

    let outcome = gate
        .run_commit_msg_check(&message, None)
        .expect("conventional message passes");

    let GateOutcome::Passed(report) = outcome else {
        panic!("expected a pass");
    };
    assert_eq!(report.stage, GateStage::CommitMsg);
    assert_eq!(report.results[0].step_name, COMMIT_MSG_STEP);
}

#[test]
fn free_form_message_is_rejected() {
    let temp = tempdir().unwrap();
    let gate = default_gate(temp.path());
    let message = write_message(temp.path(), "invalid message\n");

    let failure = gate
        .run_commit_msg_check(&message, None)
        .expect_err("free-form message fails");

    assert_eq!(failure.step, "commit-msg");
    assert_eq!(failure.message, "format invalid");
    assert!(failure.output.contains("invalid message"));
    assert!(failure.remedy.is_some());
}

#[test]
fn unknown_commit_type_is_rejected() {
    let temp = tempdir().unwrap();
    let gate = default_gate(temp.path());
    let message = write_message(temp.path(), "feature(api): add endpoint\n");

    let failure = gate
        .run_commit_msg_check(&message, None)
        .expect_err("type outside the closed set fails");
    assert!(failure.output.contains("type-enum"));
}

#[test]
fn merge_messages_are_skipped() {
    let temp = tempdir().unwrap();
    let gate = default_gate(temp.path());
    let message = write_message(temp.path(), "Merge branch 'main' into topic\n");

    let GateOutcome::Passed(report) = gate.run_commit_msg_check(&message, None).unwrap() else {
        panic!("expected a pass");
    };
    assert_eq!(report.skipped_count(), 1);
}

#[test]
fn unreadable_message_file_fails_commit_msg() {
    let temp = tempdir().unwrap();
    let gate = default_gate(temp.path());

    let failure = gate
        .run_commit_msg_check(&temp.path().join("missing"), None)
        .expect_err("missing file fails");
    assert_eq!(failure.step, COMMIT_MSG_STEP);
    assert_eq!(gate.metrics().snapshot().stages["commit-msg"].failures, 1);
}

#[test]
fn skipped_check_does_not_count_as_failure() {
    let temp = tempdir().unwrap();
    let mut registry = CheckRegistry::new();
    checks::register_defaults(&mut registry);
    let config = GateConfig {
        pre_commit: vec![
            StepSpec::new("staged-files")
                .with_param("command", vec!["sh", "-c", "exit 9", "sh", "{files}"])
                .with_param("patterns", vec!["*.rs"]),
        ],
        ..GateConfig::default()
    };
    let gate = CommitGate::from_config(&config, &registry, temp.path()).unwrap();

    let GateOutcome::Passed(report) = gate
        .run_pre_commit(&[PathBuf::from("README.md")], None)
        .unwrap()
    else {
        panic!("expected a pass");
    };
    assert!(report.results[0].skipped);
    assert_eq!(gate.metrics().snapshot().steps["staged-files"].skips, 1);
}
