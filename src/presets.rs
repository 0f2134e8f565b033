use anyhow::{Context, Result, bail};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{CONFIG_VERSION, GateConfig};
use crate::pipeline::StepSpec;

pub const PRESETS: [&str; 2] = ["typescript", "rust"];

pub fn preset_config(name: &str) -> Result<GateConfig> {
    match name {
        "typescript" => Ok(typescript_preset()),
        "rust" => Ok(rust_preset()),
        other => bail!(
            "Unknown preset '{other}'. Available presets: {}",
            PRESETS.join(", ")
        ),
    }
}

pub fn generate_preset(name: &str, destination: &Path, force: bool) -> Result<PathBuf> {
    let preset = preset_config(name)?;

    if destination.exists() && !force {
        bail!(
            "{} already exists; pass --force to overwrite it",
            destination.display()
        );
    }

    let rendered = preset.to_yaml()?;
    if let Some(parent) = destination.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(destination, rendered)
        .with_context(|| format!("Failed to write config: {}", destination.display()))?;

    Ok(destination.to_path_buf())
}

fn typescript_preset() -> GateConfig {
    GateConfig {
        version: CONFIG_VERSION,
        restage: true,
        audit_log: None,
        pre_commit: vec![
            step("staged-files", &["npx", "lint-staged"], Some("npx lint-staged")),
            step(
                "format",
                &["npx", "prettier", "--check", "."],
                Some("npx prettier --write ."),
            ),
            step("lint", &["npx", "eslint", "."], Some("npx eslint . --fix")),
            step(
                "type-check",
                &["npx", "tsc", "--noEmit"],
                Some("npx tsc --noEmit"),
            ),
        ],
        commit_msg: vec![StepSpec::new("conventional")],
    }
}

fn rust_preset() -> GateConfig {
    GateConfig {
        version: CONFIG_VERSION,
        restage: true,
        audit_log: None,
        pre_commit: vec![
            step(
                "staged-files",
                &["rustfmt", "--edition", "2021", "{files}"],
                Some("cargo fmt --all"),
            )
            .with_param("patterns", vec!["*.rs"]),
            step(
                "format",
                &["cargo", "fmt", "--all", "--", "--check"],
                Some("cargo fmt --all"),
            ),
            step(
                "lint",
                &["cargo", "clippy", "--all-targets", "--", "-D", "warnings"],
                Some("cargo clippy --all-targets --fix --allow-dirty"),
            ),
            step(
                "type-check",
                &["cargo", "check", "--all-targets"],
                Some("cargo check --all-targets"),
            ),
        ],
        commit_msg: vec![StepSpec::new("conventional")],
    }
}

fn step(check: &str, command: &[&str], remedy: Option<&str>) -> StepSpec {
    let spec = StepSpec::new(check).with_param("command", command.to_vec());
    match remedy {
        Some(remedy) => spec.with_param("remedy", remedy),
        None => spec,
    }
}
