//! Pre-commit hook.
//!
//! The added lines of the staged diff are written to a scratch directory at
//! their post-image positions, the directory is scanned like any local
//! tree, and hits in test/doc/vendored paths are dropped. Exit code `0`
//! lets the commit through; anything else blocks it.

use std::io::{BufRead, BufWriter, Write};
use std::path::{Component, Path};
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::classify::PathModel;
use crate::diff::{DiffError, GitRepo, added_lines, find_repo_root, split_file_patches};
use crate::models::{NewDiscovery, ScanMarker};
use crate::rules::RuleSet;
use crate::scanner::{FileScanner, ScanError, Scanner, WalkOptions};

#[derive(Error, Debug)]
pub enum HookError {
    #[error(transparent)]
    Git(#[from] DiffError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("failed to prepare scratch directory: {0}")]
    Io(#[from] std::io::Error),
}

pub struct Hook {
    rules: Arc<RuleSet>,
    paths: PathModel,
    max_workers: usize,
    git_timeout: Duration,
}

impl Hook {
    pub fn new(rules: Arc<RuleSet>, paths: PathModel) -> Self {
        Self {
            rules,
            paths,
            max_workers: 4,
            git_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// Discoveries in the staged additions of the repository containing `dir`.
    pub async fn staged_discoveries(&self, dir: &Path) -> Result<Vec<NewDiscovery>, HookError> {
        let root = find_repo_root(dir).await?;
        let repo = GitRepo::open(&root, self.git_timeout).await?;
        let staged = repo.staged_files().await?;
        if staged.is_empty() {
            return Ok(Vec::new());
        }
        debug!(files = staged.len(), "scanning staged files");

        // Removed when dropped, on every return path.
        let scratch = tempfile::Builder::new().prefix("secretsweep-hook-").tempdir()?;
        let diff = repo.staged_diff().await?;
        write_additions(&String::from_utf8_lossy(&diff), scratch.path())?;

        let scanner = FileScanner::new(Arc::clone(&self.rules), WalkOptions::default(), self.max_workers);
        let outcome = scanner
            .scan(
                &scratch.path().to_string_lossy(),
                &ScanMarker::beginning(),
                &CancellationToken::new(),
            )
            .await?;

        let mut found: Vec<NewDiscovery> = outcome
            .discoveries
            .into_iter()
            .filter(|d| !self.paths.matches_path(&d.file_name))
            .collect();
        found.sort_by(|a, b| (&a.file_name, a.line_number).cmp(&(&b.file_name, b.line_number)));
        Ok(found)
    }

    /// Run the hook and return the process exit code.
    ///
    /// With findings, `no_interaction` blocks immediately; otherwise the
    /// user is asked on the terminal, and a missing terminal blocks.
    pub async fn run(&self, dir: &Path, no_interaction: bool) -> Result<i32, HookError> {
        let found = self.staged_discoveries(dir).await?;
        if found.is_empty() {
            return Ok(0);
        }

        let mut stderr = std::io::stderr();
        report(&mut stderr, &found)?;

        if no_interaction {
            return Ok(1);
        }
        match std::fs::File::open("/dev/tty") {
            Ok(tty) => {
                let allow = confirm(&mut std::io::BufReader::new(tty), &mut stderr)?;
                Ok(if allow { 0 } else { 1 })
            }
            Err(e) => {
                warn!(error = %e, "no terminal to confirm on, blocking commit");
                Ok(1)
            }
        }
    }
}

/// Recreate each staged file in `root` with only its added lines, each at
/// its post-image line number. Paths escaping `root` are skipped.
pub(crate) fn write_additions(diff: &str, root: &Path) -> std::io::Result<usize> {
    let mut written = 0;
    for patch in split_file_patches(diff) {
        if patch.is_binary {
            continue;
        }
        let rel = patch.path();
        if !is_contained(Path::new(rel)) {
            warn!(file = rel, "skipping path outside the repository");
            continue;
        }
        let lines = added_lines(&patch.body);
        let Some(last) = lines.last() else {
            continue;
        };

        if last.line_number < 1 {
            continue;
        }

        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = BufWriter::new(std::fs::File::create(path)?);
        let mut next = 1;
        for line in &lines {
            if line.line_number < next {
                continue;
            }
            while next < line.line_number {
                out.write_all(b"\n")?;
                next += 1;
            }
            out.write_all(line.content.as_bytes())?;
            out.write_all(b"\n")?;
            next += 1;
        }
        out.flush()?;
        written += 1;
    }
    Ok(written)
}

fn is_contained(path: &Path) -> bool {
    !path.as_os_str().is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)))
}

fn report(out: &mut impl Write, found: &[NewDiscovery]) -> std::io::Result<()> {
    writeln!(
        out,
        "{} {} potential secret(s) in staged changes:",
        "✖".red().bold(),
        found.len()
    )?;
    for d in found {
        writeln!(
            out,
            "  {}:{}  {}",
            d.file_name.bold(),
            d.line_number.to_string().dimmed(),
            d.snippet
        )?;
    }
    Ok(())
}

/// Ask whether to commit anyway; only an explicit yes allows it.
fn confirm(input: &mut impl BufRead, out: &mut impl Write) -> std::io::Result<bool> {
    write!(out, "Commit anyway? [y/N] ")?;
    out.flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}
