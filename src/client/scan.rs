//! Scan entry points.
//!
//! Every entry point funnels into [`Client::run_scan`]:
//!
//! 1. compile the selected rules (empty set fails before anything is stored)
//! 2. register the repository, reading the marker of this scan family when
//!    it already existed
//! 3. on `force`, drop that marker (and, for snapshot and pull-request
//!    scans, the repository's discoveries)
//! 4. run the scanner
//! 5. bulk-insert discoveries, then persist the marker
//! 6. run the classifier chain and store the false positives
//! 7. optionally embed the survivors for similarity propagation
//!
//! A failing scan deletes the repository record only when this call
//! created it.

use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Client, ClientError};
use crate::classify::ClassifierChain;
use crate::models::{DiscoveryState, MarkerKind, Rule, ScanMarker};
use crate::rules::RuleSet;
use crate::scanner::{
    FileScanner, GitScanner, PullRequestScanner, ScanError, Scanner, SnapshotScanner, WalkOptions,
};

/// Options shared by the `scan*` entry points.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Only rules of this exact category.
    pub category: Option<String>,
    /// Rule ids to leave out.
    pub exclude: Vec<i64>,
    /// Classifier names, applied in order.
    pub models: Vec<String>,
    /// Ignore the stored marker and rescan everything.
    pub force: bool,
    /// Store embeddings of surviving discoveries.
    pub similarity: bool,
    /// Open a local repository in place instead of cloning it.
    pub local: bool,
    /// Walk at most this many commits per branch.
    pub max_commits: Option<usize>,
    /// Tree depth limit for snapshot and path scans, `-1` for none.
    pub max_depth: i64,
    /// Glob patterns pruned from snapshot and path scans.
    pub ignore: Vec<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            category: None,
            exclude: Vec::new(),
            models: Vec::new(),
            force: false,
            similarity: false,
            local: false,
            max_commits: None,
            max_depth: -1,
            ignore: Vec::new(),
        }
    }
}

impl ScanOptions {
    fn walk_options(&self) -> WalkOptions {
        WalkOptions {
            max_depth: self.max_depth,
            ignore: self.ignore.clone(),
            since: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    History,
    Snapshot,
    PullRequest,
    Path,
    Wiki,
}

impl Mode {
    /// Modes whose forced rescan starts from an empty discovery set.
    fn resets_discoveries(self) -> bool {
        matches!(self, Mode::Snapshot | Mode::PullRequest)
    }

    /// The marker this mode reads and advances. Pull requests are always
    /// scanned whole; wiki history shares the main repository's record and
    /// must not move its history marker.
    fn marker_kind(self) -> Option<MarkerKind> {
        match self {
            Mode::History => Some(MarkerKind::History),
            Mode::Snapshot => Some(MarkerKind::Snapshot),
            Mode::Path => Some(MarkerKind::Tree),
            Mode::PullRequest | Mode::Wiki => None,
        }
    }
}

impl Client {
    /// Scan every branch's history of `repo_url`.
    pub async fn scan(
        &self,
        repo_url: &str,
        options: &ScanOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<i64>, ClientError> {
        let config = self.scanner.clone();
        let (local, max_commits) = (options.local, options.max_commits);
        self.run_scan(repo_url, repo_url, Mode::History, options, cancel, move |rules| {
            Box::new(GitScanner::new(rules, config).local(local).max_commits(max_commits))
        })
        .await
    }

    /// Scan the tree at branch or commit `target`.
    pub async fn scan_snapshot(
        &self,
        repo_url: &str,
        target: &str,
        options: &ScanOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<i64>, ClientError> {
        let config = self.scanner.clone();
        let walk = options.walk_options();
        let target = target.to_string();
        self.run_scan(repo_url, repo_url, Mode::Snapshot, options, cancel, move |rules| {
            Box::new(SnapshotScanner::new(rules, config, target, walk))
        })
        .await
    }

    /// Scan the commits of pull request `number` through the hosting API.
    pub async fn scan_pull_request(
        &self,
        repo_url: &str,
        number: u64,
        options: &ScanOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<i64>, ClientError> {
        if options.local {
            return Err(ScanError::Unsupported("pull request scans need a hosted repository".to_string()).into());
        }
        let api = self.hosting()?;
        let workers = self.scanner.max_workers;
        self.run_scan(repo_url, repo_url, Mode::PullRequest, options, cancel, move |rules| {
            Box::new(PullRequestScanner::new(rules, api, number, workers))
        })
        .await
    }

    /// Scan a local directory tree. The repository key is the absolute path.
    pub async fn scan_path(
        &self,
        path: &Path,
        options: &ScanOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<i64>, ClientError> {
        let root = std::fs::canonicalize(path).map_err(|_| ScanError::FileNotFound(path.to_path_buf()))?;
        let key = root.to_string_lossy().into_owned();
        let walk = options.walk_options();
        let workers = self.scanner.max_workers;
        self.run_scan(&key, &key, Mode::Path, options, cancel, move |rules| {
            Box::new(FileScanner::new(rules, walk, workers))
        })
        .await
    }

    /// Scan the history of `<repo_url>.wiki.git`, storing discoveries under
    /// `repo_url`.
    pub async fn scan_wiki(
        &self,
        repo_url: &str,
        options: &ScanOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<i64>, ClientError> {
        let source = wiki_url(repo_url);
        let config = self.scanner.clone();
        let max_commits = options.max_commits;
        self.run_scan(repo_url, &source, Mode::Wiki, options, cancel, move |rules| {
            Box::new(GitScanner::new(rules, config).max_commits(max_commits))
        })
        .await
    }

    /// Scan every public, non-fork repository of `user`. Repositories that
    /// fail are logged and left out of the result.
    pub async fn scan_user(
        &self,
        user: &str,
        options: &ScanOptions,
        cancel: &CancellationToken,
    ) -> Result<IndexMap<String, usize>, ClientError> {
        let repos = self.hosting()?.user_repositories(user).await?;
        info!(user, repos = repos.len(), "scanning user repositories");

        let mut results = IndexMap::new();
        for url in repos {
            match self.scan(&url, options, cancel).await {
                Ok(ids) => {
                    results.insert(url, ids.len());
                }
                Err(ClientError::Scan(ScanError::Cancelled)) => return Err(ScanError::Cancelled.into()),
                Err(e) => warn!(repo = url.as_str(), error = %e, "repository scan failed"),
            }
        }
        Ok(results)
    }

    /// Rules of the selected category minus the excluded ids, compiled.
    pub(super) async fn load_rules(&self, options: &ScanOptions) -> Result<Arc<RuleSet>, ClientError> {
        let rules: Vec<Rule> = self
            .store
            .get_rules(options.category.as_deref())
            .await?
            .into_iter()
            .filter(|r| !options.exclude.contains(&r.id))
            .collect();
        if rules.is_empty() {
            return Err(ScanError::NoRules.into());
        }
        Ok(Arc::new(RuleSet::compile(&rules)?))
    }

    async fn run_scan<F>(
        &self,
        key: &str,
        source: &str,
        mode: Mode,
        options: &ScanOptions,
        cancel: &CancellationToken,
        build: F,
    ) -> Result<Vec<i64>, ClientError>
    where
        F: FnOnce(Arc<RuleSet>) -> Box<dyn Scanner>,
    {
        let rules = self.load_rules(options).await?;
        let scanner = build(rules);

        let created = self.store.add_repo(key).await?;
        let mut marker = match mode.marker_kind() {
            Some(kind) if !created => self
                .store
                .get_repo(key)
                .await?
                .map(|r| r.marker(kind).clone())
                .unwrap_or_default(),
            _ => ScanMarker::beginning(),
        };
        if options.force {
            marker = ScanMarker::beginning();
            if mode.resets_discoveries() {
                let removed = self.store.delete_discoveries(key).await?;
                debug!(repo = key, removed, "cleared discoveries for forced rescan");
            }
        }

        info!(repo = key, source, mode = ?mode, "scan started");
        let outcome = match scanner.scan(source, &marker, cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.forget_created(key, created).await;
                return Err(e.into());
            }
        };

        let ids = match self.store.add_discoveries(key, &outcome.discoveries).await {
            Ok(ids) => ids,
            Err(e) => {
                self.forget_created(key, created).await;
                return Err(e.into());
            }
        };
        if let Some(kind) = mode.marker_kind() {
            self.store.update_marker(key, kind, &outcome.marker).await?;
        }

        let flagged = self.classify(&ids, options).await?;
        let surviving: Vec<i64> = ids.into_iter().filter(|id| !flagged.contains(id)).collect();
        if options.similarity {
            self.embed_discoveries(&surviving).await?;
        }

        info!(
            repo = key,
            found = outcome.discoveries.len(),
            false_positives = flagged.len(),
            surviving = surviving.len(),
            "scan finished"
        );
        Ok(surviving)
    }

    async fn forget_created(&self, key: &str, created: bool) {
        if !created {
            return;
        }
        if let Err(e) = self.store.delete_repo(key).await {
            warn!(repo = key, error = %e, "failed to remove repository after failed scan");
        }
    }

    /// Run the configured classifiers over `ids`; returns the ids moved to
    /// `false_positive`.
    async fn classify(&self, ids: &[i64], options: &ScanOptions) -> Result<Vec<i64>, ClientError> {
        if ids.is_empty() || options.models.is_empty() {
            return Ok(Vec::new());
        }
        let chain = ClassifierChain::from_names(&self.registry, &options.models, &self.models);
        if chain.is_empty() {
            return Ok(Vec::new());
        }
        let discoveries = self.store.get_discoveries_by_ids(ids).await?;
        let flagged = chain.classify(&discoveries);
        if !flagged.is_empty() {
            self.store
                .update_discoveries(&flagged, DiscoveryState::FalsePositive)
                .await?;
        }
        Ok(flagged)
    }
}

/// `https://host/o/r(.git)?` → `https://host/o/r.wiki.git`.
pub(crate) fn wiki_url(repo_url: &str) -> String {
    let trimmed = repo_url.trim_end_matches('/');
    let base = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    format!("{base}.wiki.git")
}
