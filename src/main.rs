use std::env;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::exit;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use commit_gate::audit::{AuditLog, BypassSource};
use commit_gate::checks;
use commit_gate::config::{CONFIG_FILE_NAME, GateConfig};
use commit_gate::error::GateFailure;
use commit_gate::gate::{CommitGate, GateOutcome, record_bypass};
use commit_gate::git::{Git, GitRestager};
use commit_gate::hooks;
use commit_gate::message::CommitType;
use commit_gate::observability::{MetricsCollector, log_snapshot};
use commit_gate::pipeline::{CheckRegistry, GateStage};
use commit_gate::presets::{PRESETS, generate_preset};
use commit_gate::validation::validate_config;
use serde_json::to_writer_pretty;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, prelude::*};

fn main() -> Result<()> {
    let Cli { config, command } = Cli::parse();

    configure_tracing()?;

    match command {
        Commands::PreCommit {
            files,
            no_verify,
            metrics,
        } => pre_commit(config.as_deref(), files, no_verify, &metrics),
        Commands::CommitMsg {
            message_file,
            no_verify,
            metrics,
        } => commit_msg(config.as_deref(), &message_file, no_verify, &metrics),
        Commands::ListChecks => {
            list_checks();
            Ok(())
        }
        Commands::Validate => validate_cmd(config.as_deref()),
        Commands::Init {
            preset,
            output,
            force,
        } => init(&preset, output, force),
        Commands::Hooks { action } => hooks_command(action),
        Commands::Audit { limit } => audit_command(config.as_deref(), limit),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "commit-gate", &mut io::stdout());
            Ok(())
        }
    }
}

fn configure_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .try_init()
        .map_err(|err| anyhow!(err.to_string()))?;

    Ok(())
}

struct Workspace {
    root: PathBuf,
    git: Option<Git>,
    config: GateConfig,
    config_path: Option<PathBuf>,
}

fn locate_repository() -> Result<(PathBuf, Option<Git>)> {
    let cwd = env::current_dir().context("Failed to determine current directory")?;
    let git = match Git::discover(&cwd) {
        Ok(git) => Some(git),
        Err(err) => {
            debug!("Running outside a git repository: {err:#}");
            None
        }
    };
    let root = git
        .as_ref()
        .map(|git| git.root().to_path_buf())
        .unwrap_or(cwd);
    Ok((root, git))
}

fn open_workspace(config_path: Option<&Path>) -> Result<Workspace> {
    let (root, git) = locate_repository()?;
    let (config, config_path) = GateConfig::discover(config_path, &root)?;
    match &config_path {
        Some(path) => debug!(config = %path.display(), "Loaded gate configuration"),
        None => debug!("No {CONFIG_FILE_NAME} found; using built-in defaults"),
    }
    Ok(Workspace {
        root,
        git,
        config,
        config_path,
    })
}

fn config_label(ws: &Workspace) -> String {
    ws.config_path
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "<built-in defaults>".to_string())
}

fn audit_log(root: &Path, git: Option<&Git>, config: &GateConfig) -> Result<Option<AuditLog>> {
    if let Some(path) = &config.audit_log {
        let path = if path.is_absolute() {
            path.clone()
        } else {
            root.join(path)
        };
        return Ok(Some(AuditLog::new(path)));
    }
    match git {
        Some(git) => Ok(Some(AuditLog::in_git_dir(&git.git_dir()?))),
        None => Ok(None),
    }
}

fn build_registry() -> CheckRegistry {
    let mut registry = CheckRegistry::new();
    checks::register_defaults(&mut registry);
    registry
}

fn build_gate(ws: &Workspace) -> Result<CommitGate> {
    let registry = build_registry();
    let report = validate_config(&ws.config, &registry);
    let label = config_label(ws);
    if !report.is_ok() {
        for error_msg in &report.errors {
            error!(config = %label, "{error_msg}");
        }
        bail!(
            "Gate configuration is invalid ({} error(s)); run `commit-gate validate` for details",
            report.errors.len()
        );
    }

    let mut gate = CommitGate::from_config(&ws.config, &registry, &ws.root)?;
    match audit_log(&ws.root, ws.git.as_ref(), &ws.config)? {
        Some(log) => gate = gate.with_audit_log(log),
        None => warn!("No audit log available outside a git repository; bypasses are only logged"),
    }
    Ok(gate)
}

fn pre_commit(
    config_path: Option<&Path>,
    files: Vec<PathBuf>,
    no_verify: bool,
    metrics: &MetricsArgs,
) -> Result<()> {
    if let Some(source) = BypassSource::detect(no_verify) {
        return bypass(config_path, GateStage::PreCommit, source, metrics);
    }

    let ws = open_workspace(config_path)?;
    let mut gate = build_gate(&ws)?;

    let explicit = !files.is_empty();
    let staged = if explicit {
        files
    } else {
        match &ws.git {
            Some(git) => git.staged_files()?,
            None => bail!("Not inside a git repository; pass the files to check explicitly"),
        }
    };

    if ws.config.restage
        && let Some(git) = &ws.git
    {
        let indexed = if explicit {
            git.staged_files()?
        } else {
            staged.clone()
        };
        let partial = git.partially_staged(&indexed)?;
        for file in &partial {
            debug!(file = %file.display(), "File is partially staged");
        }
        gate = gate.with_restager(Box::new(GitRestager::new(git.clone(), indexed, partial)));
    }

    let result = gate.run_pre_commit(&staged, None);
    emit_metrics(&gate.metrics(), metrics)?;
    finish(GateStage::PreCommit, result)
}

fn commit_msg(
    config_path: Option<&Path>,
    message_file: &Path,
    no_verify: bool,
    metrics: &MetricsArgs,
) -> Result<()> {
    if let Some(source) = BypassSource::detect(no_verify) {
        return bypass(config_path, GateStage::CommitMsg, source, metrics);
    }

    let ws = open_workspace(config_path)?;
    let gate = build_gate(&ws)?;

    let message_file = if message_file.is_absolute() {
        message_file.to_path_buf()
    } else {
        env::current_dir()
            .context("Failed to determine current directory")?
            .join(message_file)
    };

    let result = gate.run_commit_msg_check(&message_file, None);
    emit_metrics(&gate.metrics(), metrics)?;
    finish(GateStage::CommitMsg, result)
}

/// Records a bypass without building either pipeline. An unreadable
/// configuration only drops the digest from the audit entry.
fn bypass(
    config_path: Option<&Path>,
    stage: GateStage,
    source: BypassSource,
    args: &MetricsArgs,
) -> Result<()> {
    let (root, git) = locate_repository()?;
    let (config, config_digest) = match GateConfig::discover(config_path, &root) {
        Ok((config, _)) => {
            let digest = config.digest();
            (config, Some(digest))
        }
        Err(err) => {
            warn!("Configuration is unusable, recording the bypass anyway: {err:#}");
            (GateConfig::default(), None)
        }
    };
    let audit = match audit_log(&root, git.as_ref(), &config) {
        Ok(audit) => audit,
        Err(err) => {
            error!("Failed to locate the audit log: {err:#}");
            None
        }
    };
    if audit.is_none() {
        warn!("No audit log available; the bypass is only logged");
    }

    let metrics = MetricsCollector::new();
    let record = record_bypass(stage, source, config_digest, audit.as_ref(), &metrics);
    emit_metrics(&metrics, args)?;
    finish(stage, Ok(GateOutcome::Bypassed(record)))
}

fn finish(stage: GateStage, result: Result<GateOutcome, GateFailure>) -> Result<()> {
    match result {
        Ok(GateOutcome::Passed(report)) => {
            let skipped = report.skipped_count();
            eprintln!(
                "\x1b[32m{stage} checks passed\x1b[0m ({} run, {} skipped, {} ms)",
                report.results.len() - skipped,
                skipped,
                report.duration_ms
            );
            Ok(())
        }
        Ok(GateOutcome::Bypassed(record)) => {
            eprintln!(
                "\x1b[33m{stage} checks BYPASSED via {}; nothing was verified\x1b[0m",
                record.source.describe()
            );
            Ok(())
        }
        Err(failure) => {
            report_failure(stage, &failure);
            exit(failure.process_exit_code());
        }
    }
}

fn report_failure(stage: GateStage, failure: &GateFailure) {
    error!(
        stage = stage.as_str(),
        step = failure.step.as_str(),
        exit_code = ?failure.exit_code,
        "Commit blocked"
    );
    eprintln!(
        "\x1b[31m{stage}: {} check failed\x1b[0m: {}",
        failure.step, failure.message
    );
    let output = failure.output.trim_end();
    if !output.is_empty() {
        eprintln!("{output}");
    }
    if let Some(remedy) = &failure.remedy {
        eprintln!("To fix: {remedy}");
    }
    eprintln!("Commit aborted.");
}

fn emit_metrics(metrics: &MetricsCollector, args: &MetricsArgs) -> Result<()> {
    if !args.print_metrics && args.metrics_json.is_none() {
        return Ok(());
    }
    let snapshot = metrics.snapshot();
    if args.print_metrics {
        log_snapshot(&snapshot);
    }
    if let Some(path) = &args.metrics_json {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create metrics directory: {}", parent.display())
            })?;
        }
        let file = File::create(path)
            .with_context(|| format!("Failed to create metrics file: {}", path.display()))?;
        to_writer_pretty(file, &snapshot)
            .with_context(|| format!("Failed to write metrics JSON: {}", path.display()))?;
        info!(metrics = %path.display(), "Metrics JSON written");
    }
    Ok(())
}

fn list_checks() {
    let registry = build_registry();
    println!("Available checks:");
    for name in registry.known_checks() {
        println!("- {name}");
    }
    println!();
    println!("Commit types:");
    for commit_type in CommitType::ALL {
        println!("- {:<9} {}", commit_type.as_str(), commit_type.description());
    }
}

fn validate_cmd(config_path: Option<&Path>) -> Result<()> {
    let ws = open_workspace(config_path)?;
    let registry = build_registry();
    let report = validate_config(&ws.config, &registry);
    let label = config_label(&ws);

    for warning in &report.warnings {
        warn!(config = %label, "{warning}");
    }

    if report.is_ok() {
        let gate = CommitGate::from_config(&ws.config, &registry, &ws.root)?;
        println!("pre-commit: {}", gate.pre_commit_steps().join(" -> "));
        println!("commit-msg: {}", gate.commit_msg_steps().join(" -> "));
        info!(config = %label, "Configuration is valid");
        Ok(())
    } else {
        for error_msg in &report.errors {
            error!(config = %label, "{error_msg}");
        }
        Err(anyhow!(
            "Configuration validation failed with {} error(s)",
            report.errors.len()
        ))
    }
}

fn init(preset: &str, output: Option<PathBuf>, force: bool) -> Result<()> {
    let destination = match output {
        Some(path) => path,
        None => {
            let cwd = env::current_dir().context("Failed to determine current directory")?;
            let root = Git::discover(&cwd)
                .map(|git| git.root().to_path_buf())
                .unwrap_or(cwd);
            root.join(CONFIG_FILE_NAME)
        }
    };
    let generated = generate_preset(preset, &destination, force)?;
    info!(preset, path = %generated.display(), "Configuration written");
    Ok(())
}

fn resolve_hooks_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir);
    }
    let cwd = env::current_dir().context("Failed to determine current directory")?;
    Git::discover(&cwd)?.hooks_dir()
}

fn hooks_command(command: HookCommands) -> Result<()> {
    match command {
        HookCommands::Install { hooks_dir } => {
            let dir = resolve_hooks_dir(hooks_dir)?;
            let written = hooks::install(&dir)?;
            if written.is_empty() {
                println!("Hooks already installed in {}", dir.display());
            } else {
                println!("Installed {} in {}", written.join(", "), dir.display());
            }
            Ok(())
        }
        HookCommands::Uninstall { hooks_dir } => {
            let dir = resolve_hooks_dir(hooks_dir)?;
            let removed = hooks::uninstall(&dir)?;
            if removed.is_empty() {
                println!("No commit-gate hooks found in {}", dir.display());
            } else {
                println!("Removed {} from {}", removed.join(", "), dir.display());
            }
            Ok(())
        }
        HookCommands::Status { hooks_dir } => {
            let dir = resolve_hooks_dir(hooks_dir)?;
            for status in hooks::status(&dir) {
                let state = match (status.present, status.installed) {
                    (_, true) => "installed",
                    (true, false) => "present, not managed by commit-gate",
                    (false, false) => "missing",
                };
                println!("{:<11} {state}", status.hook);
            }
            Ok(())
        }
    }
}

fn audit_command(config_path: Option<&Path>, limit: usize) -> Result<()> {
    let ws = open_workspace(config_path)?;
    let Some(log) = audit_log(&ws.root, ws.git.as_ref(), &ws.config)? else {
        bail!("No audit log configured and not inside a git repository");
    };
    let records = log.read()?;
    if records.is_empty() {
        println!("No bypasses recorded in {}", log.path().display());
        return Ok(());
    }
    let start = records.len().saturating_sub(limit);
    for record in &records[start..] {
        println!(
            "{}  {:<10}  {:<12}  {}",
            record.timestamp.to_rfc3339(),
            record.stage.as_str(),
            match record.source {
                BypassSource::Flag => "--no-verify",
                BypassSource::Environment => "env",
            },
            record.user.as_deref().unwrap_or("unknown")
        );
    }
    Ok(())
}

#[derive(Parser)]
#[command(
    name = "commit-gate",
    version,
    about = "Fail-fast pre-commit and commit-msg gate for git"
)]
struct Cli {
    /// Gate configuration file (defaults to .commit-gate.yaml at the repository root).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct MetricsArgs {
    #[arg(long)]
    print_metrics: bool,
    #[arg(long = "metrics-json")]
    metrics_json: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pre-commit pipeline against the staged files.
    PreCommit {
        /// Files to check, relative to the repository root. Defaults to the index.
        files: Vec<PathBuf>,
        /// Skip verification. Recorded in the audit log.
        #[arg(long)]
        no_verify: bool,
        #[command(flatten)]
        metrics: MetricsArgs,
    },
    /// Validate a candidate commit message file.
    CommitMsg {
        message_file: PathBuf,
        /// Skip verification. Recorded in the audit log.
        #[arg(long)]
        no_verify: bool,
        #[command(flatten)]
        metrics: MetricsArgs,
    },
    ListChecks,
    Validate,
    /// Write a starter configuration.
    Init {
        #[arg(long, default_value = "typescript", value_parser = clap::builder::PossibleValuesParser::new(PRESETS))]
        preset: String,
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        force: bool,
    },
    Hooks {
        #[command(subcommand)]
        action: HookCommands,
    },
    /// Show recorded verification bypasses.
    Audit {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum HookCommands {
    Install {
        #[arg(long)]
        hooks_dir: Option<PathBuf>,
    },
    Uninstall {
        #[arg(long)]
        hooks_dir: Option<PathBuf>,
    },
    Status {
        #[arg(long)]
        hooks_dir: Option<PathBuf>,
    },
}
