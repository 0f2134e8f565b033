use std::collections::HashSet;

use serde::Serialize;

use crate::config::{CONFIG_VERSION, GateConfig};
use crate::pipeline::{CheckRegistry, StepSpec};

#[derive(Debug, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// Conventional position of each built-in pre-commit check. Cheaper checks
/// and fixups come first so later checks see normalized input.
const CONVENTIONAL_ORDER: [&str; 4] = ["staged-files", "format", "lint", "type-check"];

pub fn validate_config(config: &GateConfig, registry: &CheckRegistry) -> ValidationReport {
    let mut report = ValidationReport::default();

    if config.version != CONFIG_VERSION {
        report
            .errors
            .push(format!("Unsupported config version: {}", config.version));
    }

    if config.pre_commit.is_empty() {
        report
            .warnings
            .push("Pre-commit pipeline is empty; every commit will pass".into());
    }
    if config.commit_msg.is_empty() {
        report
            .warnings
            .push("Commit-msg pipeline is empty; any message will be accepted".into());
    }

    if let Some(path) = &config.audit_log
        && path.as_os_str().is_empty()
    {
        report.errors.push("audit_log path cannot be empty".into());
    }

    report.merge(validate_section("pre_commit", &config.pre_commit, registry, false));
    report.merge(validate_section("commit_msg", &config.commit_msg, registry, true));
    report.merge(validate_order(&config.pre_commit));

    report
}

fn validate_section(
    section: &str,
    steps: &[StepSpec],
    registry: &CheckRegistry,
    message_stage: bool,
) -> ValidationReport {
    let mut report = ValidationReport::default();
    let mut seen = HashSet::new();

    for (idx, spec) in steps.iter().enumerate() {
        let label = format!("{section} step {} ('{}')", idx + 1, spec.check);
        let params = spec.params.clone().unwrap_or_default();
        let check = match registry.create(&spec.check, params) {
            Ok(check) => check,
            Err(err) => {
                report.errors.push(format!("{label}: {err:#}"));
                continue;
            }
        };

        if !seen.insert(check.name().to_string()) {
            report.errors.push(format!(
                "{label}: duplicate step name '{}'; give one of them a distinct 'name'",
                check.name()
            ));
        }
        if !message_stage && check.requires_message() {
            report.errors.push(format!(
                "{label}: '{}' needs a commit message and can only run in commit_msg",
                check.name()
            ));
        }
        if message_stage && check.modifies_worktree() {
            report.errors.push(format!(
                "{label}: fixup step '{}' cannot run against a commit message",
                check.name()
            ));
        }
        if check.remedy().is_none() {
            report.warnings.push(format!(
                "{label}: no 'remedy' set; failures will not suggest a fix"
            ));
        }
    }

    report
}

fn validate_order(steps: &[StepSpec]) -> ValidationReport {
    let mut report = ValidationReport::default();
    let ranks: Vec<(usize, &str)> = steps
        .iter()
        .filter_map(|spec| {
            CONVENTIONAL_ORDER
                .iter()
                .position(|kind| *kind == spec.check)
                .map(|rank| (rank, spec.check.as_str()))
        })
        .collect();

    for pair in ranks.windows(2) {
        let (prev_rank, prev) = pair[0];
        let (rank, current) = pair[1];
        if rank < prev_rank {
            report.warnings.push(format!(
                "'{current}' runs after '{prev}'; the usual order is {}",
                CONVENTIONAL_ORDER.join(" -> ")
            ));
        }
    }

    if let Some(idx) = steps.iter().position(|spec| spec.check == "staged-files")
        && idx != 0
    {
        report.warnings.push(
            "staged-files fixups should run first so later checks see the fixed files".into(),
        );
    }

    report
}
