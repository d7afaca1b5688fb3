//! Diff engine: git CLI wrapper, unified diff parsing, and the diff worker
//! that scans added lines.

pub mod git;
pub mod parser;
pub mod worker;

use thiserror::Error;

pub use git::{CommitInfo, GitRepo, find_repo_root};
pub use parser::{AddedLine, FilePatch, added_lines, split_file_patches};
pub use worker::{scan_diff, scan_patch};

/// Errors from the diff engine.
#[derive(Error, Debug)]
pub enum DiffError {
    #[error("git command failed: {0}")]
    Git(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("repository not found: {0}")]
    NotFound(String),

    #[error("git {operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
