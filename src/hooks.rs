//! Git hook installation and management.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

const PRE_COMMIT_HOOK: &str = r#"#!/bin/sh
# commit-gate pre-commit (auto-installed)
commit-gate pre-commit || exit $?
"#;

const COMMIT_MSG_HOOK: &str = r#"#!/bin/sh
# commit-gate commit-msg (auto-installed)
commit-gate commit-msg "$1" || exit $?
"#;

pub const MANAGED_HOOKS: [(&str, &str); 2] =
    [("pre-commit", PRE_COMMIT_HOOK), ("commit-msg", COMMIT_MSG_HOOK)];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HookStatus {
    pub hook: &'static str,
    pub present: bool,
    pub installed: bool,
}

pub fn install(hooks_dir: &Path) -> Result<Vec<&'static str>> {
    fs::create_dir_all(hooks_dir)
        .with_context(|| format!("Failed to create hooks directory: {}", hooks_dir.display()))?;

    let mut written = Vec::new();
    for (hook, content) in MANAGED_HOOKS {
        if install_hook(&hooks_dir.join(hook), content)? {
            info!(hook, "Installed hook");
            written.push(hook);
        }
    }
    Ok(written)
}

/// Returns `false` when the hook already runs commit-gate.
fn install_hook(path: &Path, content: &str) -> Result<bool> {
    let final_content = if path.exists() {
        let existing = fs::read_to_string(path)
            .with_context(|| format!("Failed to read hook: {}", path.display()))?;
        if existing.lines().any(is_managed_line) {
            return Ok(false);
        }
        let body = content.trim_start_matches("#!/bin/sh\n");
        format!("{}\n\n{}", existing.trim_end(), body)
    } else {
        content.to_string()
    };

    fs::write(path, final_content)
        .with_context(|| format!("Failed to write hook: {}", path.display()))?;
    make_executable(path)?;
    Ok(true)
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms)
        .with_context(|| format!("Failed to mark hook executable: {}", path.display()))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

pub fn uninstall(hooks_dir: &Path) -> Result<Vec<&'static str>> {
    let mut removed = Vec::new();
    for (hook, _) in MANAGED_HOOKS {
        let path = hooks_dir.join(hook);
        if !path.exists() {
            continue;
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read hook: {}", path.display()))?;
        if !content.lines().any(is_managed_line) {
            continue;
        }
        let cleaned = strip_managed_lines(&content);
        if cleaned.trim().is_empty() || cleaned.trim() == "#!/bin/sh" {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove hook: {}", path.display()))?;
        } else {
            fs::write(&path, cleaned)
                .with_context(|| format!("Failed to write hook: {}", path.display()))?;
        }
        info!(hook, "Removed hook");
        removed.push(hook);
    }
    Ok(removed)
}

pub fn status(hooks_dir: &Path) -> Vec<HookStatus> {
    MANAGED_HOOKS
        .iter()
        .map(|&(hook, _)| {
            let path = hooks_dir.join(hook);
            let content = fs::read_to_string(&path).ok();
            HookStatus {
                hook,
                present: content.is_some(),
                installed: content.is_some_and(|c| c.lines().any(is_managed_line)),
            }
        })
        .collect()
}

/// A line commit-gate wrote: the marker comment or the invocation of one of
/// its hooks. The shebang is shared with foreign hooks and never counts.
fn is_managed_line(line: &str) -> bool {
    let line = line.trim();
    MANAGED_HOOKS
        .iter()
        .any(|(_, script)| script.lines().skip(1).any(|managed| managed == line))
}

fn strip_managed_lines(content: &str) -> String {
    let kept: Vec<&str> = content
        .lines()
        .filter(|line| !is_managed_line(line))
        .collect();
    let mut cleaned = kept.join("\n").trim_end().to_string();
    cleaned.push('\n');
    cleaned
}
