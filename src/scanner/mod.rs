//! Scanners: apply a compiled [`RuleSet`](crate::rules::RuleSet) to a substrate and return raw
//! discoveries plus the marker bounding the next incremental scan.
//!
//! | Scanner | Substrate |
//! |---|---|
//! | [`GitScanner`] | every commit-pair diff of every branch |
//! | [`SnapshotScanner`] | the tree at a branch or commit, or the diff since the prior snapshot |
//! | [`PullRequestScanner`] | commit patches fetched from a hosting API |
//! | [`FileScanner`] | a local directory, no git |
//!
//! Per-file and per-commit failures are logged and skipped; only resource
//! acquisition (clone, checkout, API listing) fails a scan.

pub mod checkout;
pub mod file;
pub mod git;
pub mod hosting;
pub mod pr;
pub mod snapshot;
pub mod walk;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::constants::DEFAULT_API_ENDPOINT;
use crate::diff::DiffError;
use crate::models::{NewDiscovery, ScanMarker};

pub use checkout::Checkout;
pub use file::FileScanner;
pub use git::GitScanner;
pub use hosting::{CommitFile, GitHubApi, HostingApi, RepoSlug};
pub use pr::PullRequestScanner;
pub use snapshot::SnapshotScanner;
pub use walk::{TreeWalker, WalkOptions};

/// Errors that fail a whole scan.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("no rules selected for scanning")]
    NoRules,

    #[error("path not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("invalid ignore pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("scan cancelled")]
    Cancelled,

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("git error: {0}")]
    Git(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ScanError {
    /// Whether retrying the same scan may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self, ScanError::Network(_) | ScanError::Timeout(_))
    }
}

impl From<DiffError> for ScanError {
    fn from(err: DiffError) -> Self {
        match err {
            DiffError::Auth(msg) => ScanError::Auth(msg),
            DiffError::NotFound(msg) => ScanError::NotFound(msg),
            DiffError::Timeout { operation, secs } => {
                ScanError::Timeout(format!("git {operation} after {secs}s"))
            }
            DiffError::Git(msg) => ScanError::Git(msg),
            DiffError::Io(e) => ScanError::Io(e),
        }
    }
}

/// Result of a successful scan.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    /// Marker to persist once the discoveries are stored.
    pub marker: ScanMarker,
    pub discoveries: Vec<NewDiscovery>,
}

/// A scanner bound to a compiled rule set.
#[async_trait]
pub trait Scanner: Send + Sync {
    /// Scan `source` (URL or path), bounded below by `since`.
    ///
    /// Workers check `cancel` between commits and files; a cancelled scan
    /// returns [`ScanError::Cancelled`] and discards partial results.
    async fn scan(
        &self,
        source: &str,
        since: &ScanMarker,
        cancel: &CancellationToken,
    ) -> Result<ScanOutcome, ScanError>;
}

/// Resources shared by every scanner.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub max_workers: usize,
    pub clone_timeout: Duration,
    pub api_timeout: Duration,
    pub git_token: Option<String>,
    pub git_username: Option<String>,
    pub api_endpoint: String,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            clone_timeout: Duration::from_secs(300),
            api_timeout: Duration::from_secs(30),
            git_token: None,
            git_username: None,
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
        }
    }
}

pub(crate) fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
