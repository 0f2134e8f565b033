use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow, bail};
use glob::{MatchOptions, Pattern};
use serde_json::Value;
use tracing::debug;

use crate::message::{DEFAULT_MAX_HEADER_LENGTH, LintRules, lint};
use crate::pipeline::{Check, CheckContext, CheckOutput, CheckRegistry, StepParameters};

pub const FILES_PLACEHOLDER: &str = "{files}";
pub const MESSAGE_FILE_PLACEHOLDER: &str = "{message_file}";

struct CommandDefaults {
    kind: &'static str,
    name: &'static str,
    command: &'static [&'static str],
    failure_message: &'static str,
    remedy: Option<&'static str>,
    fixup: bool,
    requires_message: bool,
}

static STAGED_FILES: CommandDefaults = CommandDefaults {
    kind: "staged-files",
    name: "staged-files",
    command: &["npx", "lint-staged"],
    failure_message: "Auto-fixing the staged files failed",
    remedy: Some("npx lint-staged"),
    fixup: true,
    requires_message: false,
};

static FORMAT: CommandDefaults = CommandDefaults {
    kind: "format",
    name: "format",
    command: &["npx", "prettier", "--check", "."],
    failure_message: "Unformatted files found",
    remedy: Some("npx prettier --write ."),
    fixup: false,
    requires_message: false,
};

static LINT: CommandDefaults = CommandDefaults {
    kind: "lint",
    name: "lint",
    command: &["npx", "eslint", "."],
    failure_message: "Lint violations found",
    remedy: Some("npx eslint . --fix"),
    fixup: false,
    requires_message: false,
};

static TYPE_CHECK: CommandDefaults = CommandDefaults {
    kind: "type-check",
    name: "type-check",
    command: &["npx", "tsc", "--noEmit"],
    failure_message: "Type errors found",
    remedy: Some("npx tsc --noEmit"),
    fixup: false,
    requires_message: false,
};

static GENERIC: CommandDefaults = CommandDefaults {
    kind: "command",
    name: "command",
    command: &[],
    failure_message: "Command exited with a non-zero status",
    remedy: None,
    fixup: false,
    requires_message: false,
};

static COMMITLINT: CommandDefaults = CommandDefaults {
    kind: "commitlint",
    name: "commit-msg",
    command: &["npx", "--no", "--", "commitlint", "--edit", MESSAGE_FILE_PLACEHOLDER],
    failure_message: "format invalid",
    remedy: Some("Write the header as `<type>(<scope>): <description>`"),
    fixup: false,
    requires_message: true,
};

pub fn register_defaults(registry: &mut CheckRegistry) {
    for defaults in [&STAGED_FILES, &FORMAT, &LINT, &TYPE_CHECK, &GENERIC, &COMMITLINT] {
        registry.register(defaults.kind, move |params| {
            Ok(Box::new(CommandCheck::from_params(defaults, params)?))
        });
    }
    registry.register("conventional", |params| {
        Ok(Box::new(ConventionalCheck::from_params(params)?))
    });
}

/// Runs an external tool and judges it by its exit status.
pub struct CommandCheck {
    name: String,
    command: Vec<String>,
    patterns: Vec<Pattern>,
    failure_message: String,
    remedy: Option<String>,
    fixup: bool,
    requires_message: bool,
}

impl CommandCheck {
    fn from_params(defaults: &CommandDefaults, mut params: StepParameters) -> Result<Self> {
        let name = take_string(&mut params, "name")?.unwrap_or_else(|| defaults.name.to_string());
        let command = match take_string_list(&mut params, "command")? {
            Some(command) => command,
            None => defaults.command.iter().map(|arg| arg.to_string()).collect(),
        };
        if command.is_empty() {
            bail!("{} check requires a non-empty 'command' parameter", defaults.kind);
        }
        let patterns = take_string_list(&mut params, "patterns")?
            .unwrap_or_default()
            .iter()
            .map(|raw| {
                Pattern::new(raw).with_context(|| format!("Invalid file pattern '{raw}'"))
            })
            .collect::<Result<Vec<_>>>()?;
        let failure_message = take_string(&mut params, "failure_message")?
            .unwrap_or_else(|| defaults.failure_message.to_string());
        let remedy = take_string(&mut params, "remedy")?.or(defaults.remedy.map(str::to_string));
        let fixup = take_bool(&mut params, "fixup")?.unwrap_or(defaults.fixup);
        ensure_consumed(&params, defaults.kind)?;

        let requires_message = defaults.requires_message
            || command
                .iter()
                .any(|arg| arg.contains(MESSAGE_FILE_PLACEHOLDER));

        Ok(Self {
            name,
            command,
            patterns,
            failure_message,
            remedy,
            fixup,
            requires_message,
        })
    }

    fn select_files(&self, staged: &[PathBuf]) -> Vec<PathBuf> {
        if self.patterns.is_empty() {
            return staged.to_vec();
        }
        let options = MatchOptions::new();
        staged
            .iter()
            .filter(|path| {
                let file_name = path.file_name().map(Path::new);
                self.patterns.iter().any(|pattern| {
                    pattern.matches_path_with(path, options)
                        || file_name.is_some_and(|name| pattern.matches_path_with(name, options))
                })
            })
            .cloned()
            .collect()
    }

    fn expand_args(&self, files: &[PathBuf], ctx: &CheckContext) -> Result<Vec<String>> {
        let mut args = Vec::with_capacity(self.command.len() + files.len());
        for arg in &self.command[1..] {
            if arg == FILES_PLACEHOLDER {
                args.extend(files.iter().map(|file| file.to_string_lossy().into_owned()));
            } else if arg.contains(MESSAGE_FILE_PLACEHOLDER) {
                let message = ctx.message.as_ref().ok_or_else(|| {
                    anyhow!("{} check needs a commit message file", self.name)
                })?;
                let path = message.path().to_string_lossy();
                args.push(arg.replace(MESSAGE_FILE_PLACEHOLDER, &path));
            } else {
                args.push(arg.clone());
            }
        }
        Ok(args)
    }
}

impl Check for CommandCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn failure_message(&self) -> &str {
        &self.failure_message
    }

    fn remedy(&self) -> Option<&str> {
        self.remedy.as_deref()
    }

    fn modifies_worktree(&self) -> bool {
        self.fixup
    }

    fn requires_message(&self) -> bool {
        self.requires_message
    }

    fn run(&self, ctx: &CheckContext) -> Result<CheckOutput> {
        let files = self.select_files(&ctx.staged_files);
        let wants_files = self.command.iter().any(|arg| arg == FILES_PLACEHOLDER);
        if (wants_files || !self.patterns.is_empty()) && files.is_empty() {
            return Ok(CheckOutput::skipped("no staged files match this check"));
        }

        let program = &self.command[0];
        let args = self.expand_args(&files, ctx)?;
        debug!(
            program = program.as_str(),
            ?args,
            workdir = %ctx.workdir.display(),
            "Spawning check command"
        );

        let output = Command::new(program)
            .args(&args)
            .current_dir(&ctx.workdir)
            .output()
            .with_context(|| format!("Failed to launch '{program}'. Is it installed?"))?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stderr);
        }

        let mut result = if output.status.success() {
            CheckOutput::passed(text)
        } else {
            CheckOutput::failed(output.status.code(), text)
        };
        if self.fixup {
            result.touched = files;
        }
        Ok(result)
    }
}

/// Validates the candidate message against the conventional-commit grammar
/// without leaving the process.
pub struct ConventionalCheck {
    name: String,
    rules: LintRules,
    failure_message: String,
    remedy: String,
}

impl ConventionalCheck {
    fn from_params(mut params: StepParameters) -> Result<Self> {
        let name = take_string(&mut params, "name")?.unwrap_or_else(|| "commit-msg".to_string());
        let max_header_length = take_u64(&mut params, "max_header_length")?
            .map(|value| value as usize)
            .unwrap_or(DEFAULT_MAX_HEADER_LENGTH);
        if max_header_length == 0 {
            bail!("conventional check requires 'max_header_length' greater than zero");
        }
        let ignore_generated = take_bool(&mut params, "ignore_generated")?.unwrap_or(true);
        let failure_message =
            take_string(&mut params, "failure_message")?.unwrap_or_else(|| "format invalid".into());
        let remedy = take_string(&mut params, "remedy")?.unwrap_or_else(|| {
            "Write the header as `<type>(<scope>): <description>`, e.g. `feat(parser): support nested scopes`".into()
        });
        ensure_consumed(&params, "conventional")?;
        Ok(Self {
            name,
            rules: LintRules {
                max_header_length,
                ignore_generated,
            },
            failure_message,
            remedy,
        })
    }
}

impl Check for ConventionalCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn failure_message(&self) -> &str {
        &self.failure_message
    }

    fn remedy(&self) -> Option<&str> {
        Some(self.remedy.as_str())
    }

    fn requires_message(&self) -> bool {
        true
    }

    fn run(&self, ctx: &CheckContext) -> Result<CheckOutput> {
        let message = ctx
            .message
            .as_ref()
            .ok_or_else(|| anyhow!("{} check needs a commit message", self.name))?;
        let content = message.content();
        let report = lint(&content, &self.rules);
        if report.ignored {
            return Ok(CheckOutput::skipped("git-generated message"));
        }

        let header = content.lines().next().unwrap_or_default();
        let mut text = format!("input: {header}\n");
        for issue in &report.issues {
            text.push_str(&issue.to_string());
            text.push('\n');
        }

        if report.is_ok() {
            Ok(CheckOutput::passed(text))
        } else {
            Ok(CheckOutput::failed(None, text))
        }
    }
}

fn ensure_consumed(params: &StepParameters, kind: &str) -> Result<()> {
    if params.is_empty() {
        return Ok(());
    }
    let mut unknown: Vec<_> = params.keys().map(String::as_str).collect();
    unknown.sort();
    bail!(
        "Unknown parameter(s) for {kind} check: {}",
        unknown.join(", ")
    )
}

fn take_string(params: &mut StepParameters, key: &str) -> Result<Option<String>> {
    match params.remove(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(anyhow!("'{key}' must be a string, found {other}")),
    }
}

fn take_string_list(params: &mut StepParameters, key: &str) -> Result<Option<Vec<String>>> {
    let Some(value) = params.remove(key) else {
        return Ok(None);
    };
    match value {
        Value::String(s) => Ok(Some(s.split_whitespace().map(str::to_string).collect())),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                Value::Number(n) => Ok(n.to_string()),
                other => Err(anyhow!("'{key}' entries must be strings, found {other}")),
            })
            .collect::<Result<Vec<_>>>()
            .map(Some),
        other => Err(anyhow!("'{key}' must be a string or a list of strings, found {other}")),
    }
}

fn take_bool(params: &mut StepParameters, key: &str) -> Result<Option<bool>> {
    match params.remove(key) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(b)),
        Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(Some(true)),
            "false" | "no" | "0" => Ok(Some(false)),
            _ => Err(anyhow!("'{key}' must be a boolean, found '{s}'")),
        },
        Some(other) => Err(anyhow!("'{key}' must be a boolean, found {other}")),
    }
}

fn take_u64(params: &mut StepParameters, key: &str) -> Result<Option<u64>> {
    match params.remove(key) {
        None => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| anyhow!("'{key}' must be a non-negative integer, found {n}")),
        Some(Value::String(s)) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .with_context(|| format!("'{key}' must be a non-negative integer, found '{s}'")),
        Some(other) => Err(anyhow!("'{key}' must be a non-negative integer, found {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::CommitMessage;
    use crate::pipeline::CheckStatus;
    use serde_json::json;

    fn params(entries: &[(&str, Value)]) -> StepParameters {
        entries
            .iter()
            .map(|(key, value)| ((*key).to_string(), value.clone()))
            .collect()
    }

    fn registry() -> CheckRegistry {
        let mut registry = CheckRegistry::new();
        register_defaults(&mut registry);
        registry
    }

    #[test]
    fn defaults_follow_the_node_toolchain() {
        let registry = registry();
        let format = registry.create("format", StepParameters::new()).unwrap();
        assert_eq!(format.name(), "format");
        assert_eq!(format.remedy(), Some("npx prettier --write ."));
        assert!(!format.modifies_worktree());

        let staged = registry.create("staged-files", StepParameters::new()).unwrap();
        assert!(staged.modifies_worktree());

        let commitlint = registry.create("commitlint", StepParameters::new()).unwrap();
        assert_eq!(commitlint.name(), "commit-msg");
        assert!(commitlint.requires_message());
    }

    #[test]
    fn generic_command_requires_command() {
        let err = registry()
            .create("command", StepParameters::new())
            .err()
            .expect("missing command should fail");
        assert!(err.to_string().contains("command"));
    }

    #[test]
    fn unknown_parameters_are_rejected() {
        let err = registry()
            .create("lint", params(&[("comand", json!("eslint ."))]))
            .err()
            .expect("typo should be reported");
        assert!(err.to_string().contains("comand"));
    }

    #[test]
    fn non_string_text_parameters_are_rejected() {
        let registry = registry();
        let err = registry
            .create("lint", params(&[("remedy", json!(["npx", "eslint"]))]))
            .err()
            .expect("list remedy should fail");
        assert!(err.to_string().contains("'remedy' must be a string"));

        let err = registry
            .create("conventional", params(&[("name", json!(true))]))
            .err()
            .expect("boolean name should fail");
        assert!(err.to_string().contains("'name' must be a string"));
    }

    #[test]
    fn captures_exit_code_and_output() {
        let temp = tempfile::tempdir().unwrap();
        let check = registry()
            .create(
                "command",
                params(&[
                    ("name", json!("fails")),
                    ("command", json!(["sh", "-c", "echo broken >&2; exit 3"])),
                ]),
            )
            .unwrap();
        let output = check.run(&CheckContext::new(temp.path())).unwrap();
        assert_eq!(output.status, CheckStatus::Failed { exit_code: Some(3) });
        assert!(output.output.contains("broken"));
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let check = registry()
            .create(
                "command",
                params(&[("command", json!(["commit-gate-no-such-tool-xyz"]))]),
            )
            .unwrap();
        assert!(check.run(&CheckContext::new(temp.path())).is_err());
    }

    #[test]
    fn files_placeholder_receives_matching_staged_files() {
        let temp = tempfile::tempdir().unwrap();
        let check = registry()
            .create(
                "staged-files",
                params(&[
                    ("command", json!(["echo", "{files}"])),
                    ("patterns", json!(["*.ts"])),
                ]),
            )
            .unwrap();
        let ctx = CheckContext::new(temp.path()).with_staged_files(vec![
            PathBuf::from("src/app.ts"),
            PathBuf::from("README.md"),
        ]);
        let output = check.run(&ctx).unwrap();
        assert_eq!(output.status, CheckStatus::Passed);
        assert!(output.output.contains("src/app.ts"));
        assert!(!output.output.contains("README.md"));
        assert_eq!(output.touched, vec![PathBuf::from("src/app.ts")]);
    }

    #[test]
    fn no_matching_files_skips_the_check() {
        let temp = tempfile::tempdir().unwrap();
        let check = registry()
            .create(
                "staged-files",
                params(&[
                    ("command", json!(["false", "{files}"])),
                    ("patterns", json!(["*.rs"])),
                ]),
            )
            .unwrap();
        let ctx = CheckContext::new(temp.path())
            .with_staged_files(vec![PathBuf::from("docs/guide.md")]);
        let output = check.run(&ctx).unwrap();
        assert!(matches!(output.status, CheckStatus::Skipped(_)));
    }

    #[test]
    fn message_file_placeholder_is_substituted() {
        let temp = tempfile::tempdir().unwrap();
        let message_path = temp.path().join("COMMIT_EDITMSG");
        std::fs::write(&message_path, "feat: add thing\n").unwrap();
        let check = registry()
            .create(
                "command",
                params(&[("command", json!(["cat", "{message_file}"]))]),
            )
            .unwrap();
        assert!(check.requires_message());
        let ctx = CheckContext::new(temp.path())
            .with_message(CommitMessage::load(&message_path).unwrap());
        let output = check.run(&ctx).unwrap();
        assert_eq!(output.status, CheckStatus::Passed);
        assert!(output.output.contains("feat: add thing"));
    }

    #[test]
    fn conventional_check_reports_rule_names() {
        let check = registry()
            .create("conventional", StepParameters::new())
            .unwrap();
        let ctx = CheckContext::new(".")
            .with_message(CommitMessage::new("MSG", "Feat: Add stuff.\n"));
        let output = check.run(&ctx).unwrap();
        assert_eq!(output.status, CheckStatus::Failed { exit_code: None });
        assert!(output.output.contains("type-case"));
        assert_eq!(check.failure_message(), "format invalid");
    }

    #[test]
    fn conventional_check_rejects_zero_header_length() {
        let err = registry()
            .create(
                "conventional",
                params(&[("max_header_length", json!(0))]),
            )
            .err()
            .expect("zero limit should fail");
        assert!(err.to_string().contains("max_header_length"));
    }
}
