//! Snapshot scanner: the tree at one branch or commit.
//!
//! Cold mode checks the target out and walks every eligible file.
//! Incremental mode, used when the marker names a prior snapshot commit,
//! scans only the added/modified lines between that commit and the target.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::checkout::Checkout;
use super::file::scan_tree;
use super::walk::{TreeWalker, WalkOptions};
use super::{ScanError, ScanOutcome, Scanner, ScannerConfig, now};
use crate::diff::scan_diff;
use crate::models::ScanMarker;
use crate::rules::RuleSet;

pub struct SnapshotScanner {
    rules: Arc<RuleSet>,
    config: ScannerConfig,
    target: String,
    options: WalkOptions,
}

impl SnapshotScanner {
    /// `target` is a branch name or a commit id.
    pub fn new(rules: Arc<RuleSet>, config: ScannerConfig, target: impl Into<String>, options: WalkOptions) -> Self {
        Self {
            rules,
            config,
            target: target.into(),
            options,
        }
    }
}

#[async_trait]
impl Scanner for SnapshotScanner {
    async fn scan(
        &self,
        source: &str,
        since: &ScanMarker,
        cancel: &CancellationToken,
    ) -> Result<ScanOutcome, ScanError> {
        // Checkout rewrites the working tree, so local sources are cloned too.
        let checkout = Checkout::clone_remote(source, &self.config).await?;
        let repo = checkout.repo();
        let commit = repo.resolve(&self.target).await?;
        let started = now();

        let prior = match since.commit.as_deref() {
            Some(prior) => match repo.resolve(prior).await {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(commit = prior, error = %e, "prior snapshot not found, scanning cold");
                    None
                }
            },
            None => None,
        };

        let discoveries = match prior {
            Some(prior) if prior == commit => Vec::new(),
            Some(prior) => {
                info!(repo = source, from = prior.as_str(), to = commit.as_str(), "incremental snapshot scan");
                let diff = repo.diff(Some(&prior), &commit).await?;
                let rules = Arc::clone(&self.rules);
                let tag = commit.clone();
                let found = tokio::task::spawn_blocking(move || scan_diff(&rules, &diff, &tag))
                    .await
                    .map_err(|e| ScanError::Io(std::io::Error::other(format!("diff worker failed: {e}"))))?;
                if cancel.is_cancelled() {
                    return Err(ScanError::Cancelled);
                }
                found
            }
            None => {
                info!(repo = source, commit = commit.as_str(), "cold snapshot scan");
                repo.checkout(&commit).await?;
                let walker = TreeWalker::new(repo.dir(), &self.options)?;
                scan_tree(
                    Arc::clone(&self.rules),
                    walker,
                    commit.clone(),
                    self.config.max_workers,
                    cancel.clone(),
                )
                .await?
            }
        };

        Ok(ScanOutcome {
            marker: ScanMarker::at(started).with_commit(commit),
            discoveries,
        })
    }
}
