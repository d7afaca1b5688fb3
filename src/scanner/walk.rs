//! Tree walker shared by the snapshot and file scanners.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use super::ScanError;
use crate::constants::{BINARY_SNIFF_LEN, MAX_LINE_LEN};
use crate::models::NewDiscovery;
use crate::rules::{MatchContext, ResultHandler, RuleSet};

/// Filesystem filters for a tree scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkOptions {
    /// Maximum number of path separators in a relative file path; `-1`
    /// means unlimited, `0` means files directly under the root.
    pub max_depth: i64,
    /// Glob patterns matched against relative paths. Matching directories
    /// are not descended into.
    pub ignore: Vec<String>,
    /// Files last modified before this unix timestamp are skipped.
    pub since: i64,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            max_depth: -1,
            ignore: Vec::new(),
            since: 0,
        }
    }
}

/// A file selected by the walker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkedFile {
    pub path: PathBuf,
    /// Path relative to the walk root, `/`-separated.
    pub relative: String,
}

#[derive(Debug, Clone)]
pub struct TreeWalker {
    root: PathBuf,
    max_depth: Option<usize>,
    ignore: GlobSet,
    since: i64,
}

impl TreeWalker {
    pub fn new(root: &Path, options: &WalkOptions) -> Result<Self, ScanError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &options.ignore {
            let glob = Glob::new(pattern).map_err(|e| ScanError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
            builder.add(glob);
        }
        let ignore = builder.build().map_err(|e| ScanError::InvalidPattern {
            pattern: options.ignore.join(", "),
            reason: e.to_string(),
        })?;

        Ok(Self {
            root: root.to_path_buf(),
            max_depth: usize::try_from(options.max_depth).ok(),
            ignore,
            since: options.since,
        })
    }

    /// Eligible files, in walk order.
    pub fn files(&self) -> Vec<WalkedFile> {
        let mut walker = WalkDir::new(&self.root).min_depth(1).sort_by_file_name();
        if let Some(depth) = self.max_depth {
            // walkdir depth 1 is a file directly under the root
            walker = walker.max_depth(depth + 1);
        }

        let mut files = Vec::new();
        for entry in walker.into_iter().filter_entry(|e| !self.is_pruned(e)) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable path");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if self.since > 0 && modified_before(&entry, self.since) {
                continue;
            }
            files.push(WalkedFile {
                path: entry.path().to_path_buf(),
                relative: self.relative(entry.path()),
            });
        }
        files
    }

    fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn is_pruned(&self, entry: &DirEntry) -> bool {
        if entry.file_type().is_dir() && entry.file_name() == ".git" {
            return true;
        }
        self.ignore.is_match(self.relative(entry.path()))
    }
}

fn modified_before(entry: &DirEntry, since: i64) -> bool {
    let modified = entry
        .metadata()
        .ok()
        .and_then(|m| m.modified().ok())
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64);
    matches!(modified, Some(ts) if ts < since)
}

/// Scan one file line by line.
///
/// A NUL byte in the first [`BINARY_SNIFF_LEN`] bytes marks the file as
/// binary and the rest is never read. Files that are not valid UTF-8 are
/// treated as binary too. Snippets keep trailing whitespace; lines longer
/// than [`MAX_LINE_LEN`] bytes are skipped.
pub fn scan_file(rules: &RuleSet, path: &Path, file_name: &str, commit_id: &str) -> Vec<NewDiscovery> {
    let content = match read_text(path) {
        Ok(Some(content)) => content,
        Ok(None) => {
            debug!(file = file_name, "skipping binary file");
            return Vec::new();
        }
        Err(e) => {
            warn!(file = file_name, error = %e, "skipping unreadable file");
            return Vec::new();
        }
    };

    let mut handler = ResultHandler::new();
    for (index, line) in content.lines().enumerate() {
        if line.len() > MAX_LINE_LEN {
            continue;
        }
        handler.scan_line(
            rules,
            &MatchContext {
                snippet: line,
                file_name,
                commit_id,
                line_number: index as i64 + 1,
            },
        );
    }
    handler.into_discoveries()
}

/// The file as text, or `None` when it looks binary.
fn read_text(path: &Path) -> std::io::Result<Option<String>> {
    let mut file = File::open(path)?;
    let mut bytes = Vec::new();
    (&mut file).take(BINARY_SNIFF_LEN).read_to_end(&mut bytes)?;
    if bytes.contains(&0) {
        return Ok(None);
    }
    file.read_to_end(&mut bytes)?;
    Ok(String::from_utf8(bytes).ok())
}
