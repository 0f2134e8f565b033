//! Thin wrapper over the `git` executable.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use tracing::{debug, warn};

use crate::pipeline::Restage;

#[derive(Debug, Clone)]
pub struct Git {
    root: PathBuf,
}

impl Git {
    /// Locate the repository containing `start`.
    pub fn discover(start: &Path) -> Result<Self> {
        let output = Command::new("git")
            .args(["rev-parse", "--show-toplevel"])
            .current_dir(start)
            .output()
            .context("Failed to run git. Is it installed?")?;
        if !output.status.success() {
            bail!(
                "{} is not inside a git repository: {}",
                start.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(Self {
            root: PathBuf::from(root),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Added, copied, modified and renamed paths in the index.
    pub fn staged_files(&self) -> Result<Vec<PathBuf>> {
        let listing = self.run(&[
            "diff",
            "--cached",
            "--name-only",
            "-z",
            "--diff-filter=ACMR",
        ])?;
        Ok(split_nul(&listing))
    }

    pub fn unstaged_files(&self) -> Result<Vec<PathBuf>> {
        let listing = self.run(&["diff", "--name-only", "-z"])?;
        Ok(split_nul(&listing))
    }

    /// Staged files that also carry unstaged edits. `git add` on these would
    /// sweep the unstaged hunks into the commit.
    pub fn partially_staged(&self, staged: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let unstaged: BTreeSet<PathBuf> = self.unstaged_files()?.into_iter().collect();
        Ok(staged
            .iter()
            .filter(|path| unstaged.contains(*path))
            .cloned()
            .collect())
    }

    pub fn add(&self, files: &[PathBuf]) -> Result<()> {
        if files.is_empty() {
            return Ok(());
        }
        let mut args = vec!["add".to_string(), "--".to_string()];
        args.extend(files.iter().map(|f| f.to_string_lossy().into_owned()));
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&arg_refs)?;
        Ok(())
    }

    pub fn git_dir(&self) -> Result<PathBuf> {
        let raw = self.run(&["rev-parse", "--git-dir"])?;
        Ok(self.absolute(raw.trim()))
    }

    /// Hooks directory, honouring `core.hooksPath`.
    pub fn hooks_dir(&self) -> Result<PathBuf> {
        let raw = self.run(&["rev-parse", "--git-path", "hooks"])?;
        Ok(self.absolute(raw.trim()))
    }

    fn absolute(&self, raw: &str) -> PathBuf {
        let path = PathBuf::from(raw);
        if path.is_absolute() {
            path
        } else {
            self.root.join(path)
        }
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        debug!(?args, "Running git");
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()
            .with_context(|| format!("Failed to run git {}", args.join(" ")))?;
        if !output.status.success() {
            bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn split_nul(listing: &str) -> Vec<PathBuf> {
    listing
        .split('\0')
        .filter(|entry| !entry.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Re-stages fixup output. Only files that were already in the index are
/// added back, and partially staged ones are left alone.
pub struct GitRestager {
    git: Git,
    indexed: BTreeSet<PathBuf>,
    excluded: BTreeSet<PathBuf>,
}

impl GitRestager {
    pub fn new(git: Git, indexed: Vec<PathBuf>, partially_staged: Vec<PathBuf>) -> Self {
        Self {
            git,
            indexed: indexed.into_iter().collect(),
            excluded: partially_staged.into_iter().collect(),
        }
    }

    fn eligible(&self, files: &[PathBuf]) -> Vec<PathBuf> {
        let mut eligible = Vec::with_capacity(files.len());
        for file in files {
            if self.excluded.contains(file) {
                warn!(
                    file = %file.display(),
                    "Partially staged file was not re-staged; review and `git add` it manually"
                );
            } else if !self.indexed.contains(file) {
                debug!(file = %file.display(), "File was not staged; leaving it out of the index");
            } else {
                eligible.push(file.clone());
            }
        }
        eligible
    }
}

impl Restage for GitRestager {
    fn restage(&self, files: &[PathBuf]) -> Result<()> {
        let eligible = self.eligible(files);
        debug!(count = eligible.len(), "Re-staging fixed files");
        self.git.add(&eligible)
    }
}
