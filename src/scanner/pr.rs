//! Pull-request scanner: scans commit patches fetched from the hosting API.
//! Nothing is cloned; the patch text is enough.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::hosting::{HostingApi, RepoSlug};
use super::{ScanError, ScanOutcome, Scanner, now};
use crate::diff::scan_patch;
use crate::models::ScanMarker;
use crate::rules::{ResultHandler, RuleSet};

pub struct PullRequestScanner {
    rules: Arc<RuleSet>,
    api: Arc<dyn HostingApi>,
    number: u64,
    max_workers: usize,
}

impl PullRequestScanner {
    pub fn new(rules: Arc<RuleSet>, api: Arc<dyn HostingApi>, number: u64, max_workers: usize) -> Self {
        Self {
            rules,
            api,
            number,
            max_workers: max_workers.max(1),
        }
    }
}

#[async_trait]
impl Scanner for PullRequestScanner {
    /// `source` is the repository URL. The marker is ignored: a pull
    /// request is always scanned whole.
    async fn scan(
        &self,
        source: &str,
        _since: &ScanMarker,
        cancel: &CancellationToken,
    ) -> Result<ScanOutcome, ScanError> {
        let slug = RepoSlug::parse(source)
            .ok_or_else(|| ScanError::Unsupported(format!("cannot derive owner/name from '{source}'")))?;
        let commits = self.api.pull_request_commits(&slug, self.number).await?;
        info!(repo = source, pr = self.number, commits = commits.len(), "scanning pull request");

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut join_set = JoinSet::new();
        for sha in commits.iter().cloned() {
            let api = Arc::clone(&self.api);
            let rules = Arc::clone(&self.rules);
            let sem = Arc::clone(&semaphore);
            let slug = slug.clone();
            let cancel = cancel.clone();

            join_set.spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return Vec::new();
                };
                if cancel.is_cancelled() {
                    return Vec::new();
                }
                let files = match api.commit_files(&slug, &sha).await {
                    Ok(files) => files,
                    Err(e) => {
                        warn!(commit = sha.as_str(), error = %e, "skipping commit");
                        return Vec::new();
                    }
                };
                let mut handler = ResultHandler::new();
                for file in &files {
                    if let Some(patch) = &file.patch {
                        scan_patch(&rules, &mut handler, &file.filename, &sha, patch);
                    }
                }
                handler.into_discoveries()
            });
        }

        let mut discoveries = Vec::new();
        while let Some(result) = join_set.join_next().await {
            match result {
                Ok(found) => discoveries.extend(found),
                Err(e) => warn!(error = %e, "pull request task failed"),
            }
        }
        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        Ok(ScanOutcome {
            marker: ScanMarker {
                timestamp: now(),
                commit: commits.last().cloned(),
            },
            discoveries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Rule;
    use crate::scanner::hosting::CommitFile;

    struct MockApi;

    #[async_trait]
    impl HostingApi for MockApi {
        async fn pull_request_commits(&self, repo: &RepoSlug, number: u64) -> Result<Vec<String>, ScanError> {
            assert_eq!(repo.owner, "acme");
            if number == 7 {
                Ok(vec!["c1".to_string(), "c2".to_string()])
            } else {
                Err(ScanError::NotFound(format!("pull {number}")))
            }
        }

        async fn commit_files(&self, _repo: &RepoSlug, sha: &str) -> Result<Vec<CommitFile>, ScanError> {
            match sha {
                "c1" => Ok(vec![
                    CommitFile {
                        filename: "app/settings.py".to_string(),
                        patch: Some("@@ -3,0 +4,2 @@\n+DEBUG = True\n+PASSWORD = 'x'".to_string()),
                    },
                    CommitFile {
                        filename: "logo.png".to_string(),
                        patch: None,
                    },
                ]),
                _ => Err(ScanError::Network("flaky".to_string())),
            }
        }

        async fn user_repositories(&self, _user: &str) -> Result<Vec<String>, ScanError> {
            Ok(Vec::new())
        }
    }

    fn scanner(number: u64) -> PullRequestScanner {
        let rules = RuleSet::compile(&[Rule {
            id: 1,
            regex: "password".to_string(),
            category: "password".to_string(),
            description: None,
        }])
        .unwrap();
        PullRequestScanner::new(Arc::new(rules), Arc::new(MockApi), number, 4)
    }

    #[tokio::test]
    async fn scans_patches_and_tags_commit() {
        let outcome = scanner(7)
            .scan("https://github.com/acme/app", &ScanMarker::beginning(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.discoveries.len(), 1);
        let d = &outcome.discoveries[0];
        assert_eq!(d.commit_id, "c1");
        assert_eq!(d.file_name, "app/settings.py");
        assert_eq!(d.line_number, 5);
        assert_eq!(outcome.marker.commit.as_deref(), Some("c2"));
    }

    #[tokio::test]
    async fn unknown_pull_request_fails_the_scan() {
        let result = scanner(8)
            .scan("https://github.com/acme/app", &ScanMarker::beginning(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ScanError::NotFound(_))));
    }

    #[tokio::test]
    async fn unparseable_source_is_unsupported() {
        let result = scanner(7)
            .scan("not-a-repo", &ScanMarker::beginning(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ScanError::Unsupported(_))));
    }
}
