//! History sweep: scan every commit-pair diff reachable from every branch.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::checkout::Checkout;
use super::{ScanError, ScanOutcome, Scanner, ScannerConfig, now};
use crate::constants::EMPTY_TREE;
use crate::diff::{GitRepo, scan_diff};
use crate::models::{NewDiscovery, ScanMarker};
use crate::rules::RuleSet;

/// One diff to scan: `older → newer`, discoveries tagged with `newer`.
/// `older = None` is the empty tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DiffJob {
    pub older: Option<String>,
    pub newer: String,
}

pub struct GitScanner {
    rules: Arc<RuleSet>,
    config: ScannerConfig,
    local: bool,
    max_commits: Option<usize>,
}

impl GitScanner {
    pub fn new(rules: Arc<RuleSet>, config: ScannerConfig) -> Self {
        Self {
            rules,
            config,
            local: false,
            max_commits: None,
        }
    }

    /// Open the source in place instead of cloning it.
    pub fn local(mut self, local: bool) -> Self {
        self.local = local;
        self
    }

    /// Walk at most `max` commits per branch.
    pub fn max_commits(mut self, max: Option<usize>) -> Self {
        self.max_commits = max;
        self
    }
}

#[async_trait]
impl Scanner for GitScanner {
    async fn scan(
        &self,
        source: &str,
        since: &ScanMarker,
        cancel: &CancellationToken,
    ) -> Result<ScanOutcome, ScanError> {
        let started = now();
        let checkout = Checkout::acquire(source, self.local, &self.config).await?;
        let repo = checkout.repo();
        if checkout.is_scratch() {
            repo.fetch_all().await?;
        }

        let since_ts = since_timestamp(repo, since).await;
        let jobs = plan_diffs(repo, since_ts, self.max_commits).await?;
        info!(repo = source, since = since_ts, diffs = jobs.len(), "scanning history");

        let discoveries = run_diffs(repo, &self.rules, jobs, self.config.max_workers, cancel).await?;

        let head = repo.resolve("HEAD").await.ok();
        let marker = ScanMarker {
            timestamp: started,
            commit: head,
        };
        Ok(ScanOutcome {
            marker,
            discoveries,
        })
    }
}

/// Lower bound for commit dates. A commit-only marker resolves to that
/// commit's date; an unknown commit scans from the beginning.
async fn since_timestamp(repo: &GitRepo, marker: &ScanMarker) -> i64 {
    if marker.timestamp > 0 {
        return marker.timestamp;
    }
    match &marker.commit {
        Some(commit) => match repo.commit_time(commit).await {
            Ok(ts) => ts,
            Err(e) => {
                warn!(commit = commit.as_str(), error = %e, "prior commit not found, scanning full history");
                0
            }
        },
        None => 0,
    }
}

/// Walk each branch newest to oldest and collect the diffs not yet seen.
///
/// Adjacent pairs are keyed by `md5(newer || older)`, so history shared
/// between branches and merge parents is diffed once. A branch walk stops
/// at the first pair whose newer commit is not after `since`.
pub(crate) async fn plan_diffs(
    repo: &GitRepo,
    since: i64,
    max_commits: Option<usize>,
) -> Result<Vec<DiffJob>, ScanError> {
    let mut seen: HashSet<[u8; 16]> = HashSet::new();
    let mut jobs = Vec::new();

    for branch in repo.branches().await? {
        let commits = repo.commits(&branch, max_commits).await?;
        debug!(branch = branch.as_str(), commits = commits.len(), "walking branch");

        for pair in commits.windows(2) {
            let (prev, curr) = (&pair[0], &pair[1]);
            if prev.committed_at <= since {
                break;
            }
            if seen.insert(pair_hash(&prev.id, &curr.id)) {
                jobs.push(DiffJob {
                    older: Some(curr.id.clone()),
                    newer: prev.id.clone(),
                });
            }
            if curr.committed_at <= since {
                break;
            }
        }

        if since == 0 {
            if let Some(oldest) = commits.last() {
                if seen.insert(pair_hash(&oldest.id, EMPTY_TREE)) {
                    jobs.push(DiffJob {
                        older: None,
                        newer: oldest.id.clone(),
                    });
                }
            }
        }
    }

    Ok(jobs)
}

fn pair_hash(newer: &str, older: &str) -> [u8; 16] {
    let mut ctx = md5::Context::new();
    ctx.consume(newer.as_bytes());
    ctx.consume(older.as_bytes());
    ctx.compute().0
}

/// Diff and scan jobs concurrently on at most `max_workers` tasks.
pub(crate) async fn run_diffs(
    repo: &GitRepo,
    rules: &Arc<RuleSet>,
    jobs: Vec<DiffJob>,
    max_workers: usize,
    cancel: &CancellationToken,
) -> Result<Vec<NewDiscovery>, ScanError> {
    let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));
    let mut join_set = JoinSet::new();

    for job in jobs {
        let repo = repo.clone();
        let rules = Arc::clone(rules);
        let sem = Arc::clone(&semaphore);
        let cancel = cancel.clone();

        join_set.spawn(async move {
            let Ok(_permit) = sem.acquire_owned().await else {
                return Vec::new();
            };
            if cancel.is_cancelled() {
                return Vec::new();
            }
            let diff = match repo.diff(job.older.as_deref(), &job.newer).await {
                Ok(diff) => diff,
                Err(e) => {
                    warn!(commit = job.newer.as_str(), error = %e, "skipping commit");
                    return Vec::new();
                }
            };
            let commit = job.newer;
            tokio::task::spawn_blocking(move || scan_diff(&rules, &diff, &commit))
                .await
                .unwrap_or_else(|e| {
                    warn!(error = %e, "diff worker panicked");
                    Vec::new()
                })
        });
    }

    let mut discoveries = Vec::new();
    while let Some(result) = join_set.join_next().await {
        match result {
            Ok(found) => discoveries.extend(found),
            Err(e) => warn!(error = %e, "diff task failed"),
        }
    }

    if cancel.is_cancelled() {
        return Err(ScanError::Cancelled);
    }
    Ok(discoveries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Rule;
    use std::path::Path;
    use std::time::Duration;

    const T: i64 = 1_600_000_000;

    fn git(dir: &Path, args: &[&str]) {
        let out = std::process::Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(out.status.success(), "git {args:?}: {}", String::from_utf8_lossy(&out.stderr));
    }

    fn init(dir: &Path) {
        git(dir, &["init", "-q", "-b", "main"]);
        git(dir, &["config", "user.email", "t@t.com"]);
        git(dir, &["config", "user.name", "T"]);
    }

    fn commit_at(dir: &Path, file: &str, content: &str, epoch: i64) {
        std::fs::write(dir.join(file), content).unwrap();
        git(dir, &["add", "."]);
        let date = format!("@{epoch} +0000");
        let out = std::process::Command::new("git")
            .args(["commit", "-q", "-m", file])
            .env("GIT_AUTHOR_DATE", &date)
            .env("GIT_COMMITTER_DATE", &date)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(out.status.success());
    }

    fn rules() -> Arc<RuleSet> {
        Arc::new(
            RuleSet::compile(&[Rule {
                id: 1,
                regex: "password".to_string(),
                category: "password".to_string(),
                description: None,
            }])
            .unwrap(),
        )
    }

    fn scanner() -> GitScanner {
        GitScanner::new(rules(), ScannerConfig::default()).local(true)
    }

    #[tokio::test]
    async fn first_scan_includes_initial_import() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path();
        init(p);
        commit_at(p, "a.txt", "password=1\n", T + 1_000);
        commit_at(p, "a.txt", "password=1\nok\npassword=2\n", T + 2_000);

        let outcome = scanner()
            .scan(&p.to_string_lossy(), &ScanMarker::beginning(), &CancellationToken::new())
            .await
            .unwrap();
        let mut lines: Vec<i64> = outcome.discoveries.iter().map(|d| d.line_number).collect();
        lines.sort();
        assert_eq!(lines, vec![1, 3]);
        assert!(outcome.marker.commit.is_some());
    }

    #[tokio::test]
    async fn since_bounds_the_walk() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path();
        init(p);
        commit_at(p, "a.txt", "password=old\n", T + 1_000);
        commit_at(p, "b.txt", "password=mid\n", T + 2_000);
        commit_at(p, "c.txt", "password=new\n", T + 3_000);

        let outcome = scanner()
            .scan(&p.to_string_lossy(), &ScanMarker::at(T + 2_500), &CancellationToken::new())
            .await
            .unwrap();
        let files: Vec<&str> = outcome.discoveries.iter().map(|d| d.file_name.as_str()).collect();
        assert_eq!(files, vec!["c.txt"]);

        let nothing_new = scanner()
            .scan(&p.to_string_lossy(), &ScanMarker::at(T + 3_000), &CancellationToken::new())
            .await
            .unwrap();
        assert!(nothing_new.discoveries.is_empty());
    }

    #[tokio::test]
    async fn shared_history_is_diffed_once() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path();
        init(p);
        commit_at(p, "base.txt", "base\n", T + 1_000);
        commit_at(p, "shared.txt", "password=shared\n", T + 2_000);
        git(p, &["branch", "feature"]);
        commit_at(p, "main.txt", "password=main\n", T + 3_000);

        let repo = GitRepo::open(p, Duration::from_secs(30)).await.unwrap();
        let jobs = plan_diffs(&repo, 0, None).await.unwrap();
        // main: 2 pairs + import; feature: its only pair and import are shared
        assert_eq!(jobs.len(), 3);

        let outcome = scanner()
            .scan(&p.to_string_lossy(), &ScanMarker::beginning(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.discoveries.len(), 2);
    }

    #[tokio::test]
    async fn cancelled_history_scan() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path();
        init(p);
        commit_at(p, "a.txt", "password\n", T + 1_000);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = scanner().scan(&p.to_string_lossy(), &ScanMarker::beginning(), &cancel).await;
        assert!(matches!(result, Err(ScanError::Cancelled)));
    }

    #[test]
    fn pair_hash_depends_on_order() {
        assert_ne!(pair_hash("a", "b"), pair_hash("b", "a"));
        assert_eq!(pair_hash("a", "b"), pair_hash("a", "b"));
    }
}
