//! Local directory scanner. No git: every discovery has an empty commit id.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rayon::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::walk::{TreeWalker, WalkOptions, WalkedFile, scan_file};
use super::{ScanError, ScanOutcome, Scanner, now};
use crate::models::{NewDiscovery, ScanMarker};
use crate::rules::RuleSet;

pub struct FileScanner {
    rules: Arc<RuleSet>,
    options: WalkOptions,
    max_workers: usize,
}

impl FileScanner {
    pub fn new(rules: Arc<RuleSet>, options: WalkOptions, max_workers: usize) -> Self {
        Self {
            rules,
            options,
            max_workers: max_workers.max(1),
        }
    }
}

#[async_trait]
impl Scanner for FileScanner {
    /// `source` is a directory. `since.timestamp` tightens the mtime filter.
    async fn scan(
        &self,
        source: &str,
        since: &ScanMarker,
        cancel: &CancellationToken,
    ) -> Result<ScanOutcome, ScanError> {
        let root = Path::new(source);
        if !root.exists() {
            return Err(ScanError::FileNotFound(root.to_path_buf()));
        }

        let mut options = self.options.clone();
        options.since = options.since.max(since.timestamp);
        let started = now();
        let walker = TreeWalker::new(root, &options)?;

        let discoveries = scan_tree(
            Arc::clone(&self.rules),
            walker,
            String::new(),
            self.max_workers,
            cancel.clone(),
        )
        .await?;

        info!(path = source, discoveries = discoveries.len(), "file scan finished");
        Ok(ScanOutcome {
            marker: ScanMarker::at(started),
            discoveries,
        })
    }
}

/// Walk and scan a tree on a bounded rayon pool off the async runtime.
pub(crate) async fn scan_tree(
    rules: Arc<RuleSet>,
    walker: TreeWalker,
    commit_id: String,
    max_workers: usize,
    cancel: CancellationToken,
) -> Result<Vec<NewDiscovery>, ScanError> {
    let worker_cancel = cancel.clone();
    let discoveries = tokio::task::spawn_blocking(move || {
        let files = walker.files();
        let scan = |file: &WalkedFile| {
            if worker_cancel.is_cancelled() {
                return Vec::new();
            }
            scan_file(&rules, &file.path, &file.relative, &commit_id)
        };
        match rayon::ThreadPoolBuilder::new().num_threads(max_workers).build() {
            Ok(pool) => pool.install(|| files.par_iter().flat_map_iter(scan).collect::<Vec<_>>()),
            Err(e) => {
                warn!(error = %e, "falling back to sequential file scan");
                files.iter().flat_map(scan).collect()
            }
        }
    })
    .await
    .map_err(|e| ScanError::Io(std::io::Error::other(format!("scan task failed: {e}"))))?;

    if cancel.is_cancelled() {
        return Err(ScanError::Cancelled);
    }
    Ok(discoveries)
}
