//! Hosting API access (GitHub REST v3 shape).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::ScanError;
use crate::constants::USER_AGENT;

const PER_PAGE: usize = 100;

/// Owner and name of a hosted repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSlug {
    pub owner: String,
    pub name: String,
}

impl RepoSlug {
    /// Parse `https://host/owner/name(.git)?`, `git@host:owner/name(.git)?`,
    /// or a bare `owner/name`.
    pub fn parse(url: &str) -> Option<Self> {
        let trimmed = url.trim().trim_end_matches('/');
        let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
        let path = if let Some((_, rest)) = trimmed.split_once("://") {
            rest.split_once('/').map(|(_, path)| path)?
        } else if let Some((_, rest)) = trimmed.split_once(':') {
            rest
        } else {
            trimmed
        };
        let mut parts = path.rsplitn(2, '/');
        let name = parts.next()?.to_string();
        let owner = parts.next()?.rsplit('/').next()?.to_string();
        if owner.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self { owner, name })
    }
}

/// A file touched by a commit, with its unified patch when the API has one.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommitFile {
    pub filename: String,
    #[serde(default)]
    pub patch: Option<String>,
}

/// The hosting API calls scanners need.
#[async_trait]
pub trait HostingApi: Send + Sync {
    /// Commit ids of a pull request, oldest first.
    async fn pull_request_commits(&self, repo: &RepoSlug, number: u64) -> Result<Vec<String>, ScanError>;

    async fn commit_files(&self, repo: &RepoSlug, sha: &str) -> Result<Vec<CommitFile>, ScanError>;

    /// Clone URLs of a user's public repositories.
    async fn user_repositories(&self, user: &str) -> Result<Vec<String>, ScanError>;
}

#[derive(Deserialize)]
struct CommitRef {
    sha: String,
}

#[derive(Deserialize)]
struct CommitDetail {
    #[serde(default)]
    files: Vec<CommitFile>,
}

#[derive(Deserialize)]
struct RepoEntry {
    clone_url: String,
    #[serde(default)]
    fork: bool,
}

/// REST client for GitHub and GitHub Enterprise (`api_endpoint` points at
/// `https://<host>/api/v3` for the latter).
#[derive(Debug, Clone)]
pub struct GitHubApi {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl GitHubApi {
    pub fn new(endpoint: &str, token: Option<String>, timeout: Duration) -> Result<Self, ScanError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ScanError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ScanError> {
        let url = format!("{}{path}", self.endpoint);
        debug!(url = url.as_str(), "hosting api request");
        let mut request = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let resp = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ScanError::Timeout(format!("{url}: {e}"))
            } else {
                ScanError::Network(format!("{url}: {e}"))
            }
        })?;

        if let Some(err) = status_error(resp.status(), &url) {
            return Err(err);
        }

        resp.json()
            .await
            .map_err(|e| ScanError::Network(format!("failed to parse response from {url}: {e}")))
    }

    /// Follow `page=` pagination until a short page.
    async fn get_paginated<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, ScanError> {
        let sep = if path.contains('?') { '&' } else { '?' };
        let mut all = Vec::new();
        for page in 1.. {
            let batch: Vec<T> = self
                .get(&format!("{path}{sep}per_page={PER_PAGE}&page={page}"))
                .await?;
            let done = batch.len() < PER_PAGE;
            all.extend(batch);
            if done {
                break;
            }
        }
        Ok(all)
    }
}

#[async_trait]
impl HostingApi for GitHubApi {
    async fn pull_request_commits(&self, repo: &RepoSlug, number: u64) -> Result<Vec<String>, ScanError> {
        let commits: Vec<CommitRef> = self
            .get_paginated(&format!("/repos/{}/{}/pulls/{number}/commits", repo.owner, repo.name))
            .await?;
        Ok(commits.into_iter().map(|c| c.sha).collect())
    }

    async fn commit_files(&self, repo: &RepoSlug, sha: &str) -> Result<Vec<CommitFile>, ScanError> {
        let detail: CommitDetail = self
            .get(&format!("/repos/{}/{}/commits/{sha}", repo.owner, repo.name))
            .await?;
        Ok(detail.files)
    }

    async fn user_repositories(&self, user: &str) -> Result<Vec<String>, ScanError> {
        let repos: Vec<RepoEntry> = self.get_paginated(&format!("/users/{user}/repos")).await?;
        Ok(repos
            .into_iter()
            .filter(|r| !r.fork)
            .map(|r| r.clone_url)
            .collect())
    }
}

fn status_error(status: StatusCode, url: &str) -> Option<ScanError> {
    if status.is_success() {
        return None;
    }
    Some(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ScanError::Auth(format!("{url}: HTTP {status}"))
        }
        StatusCode::NOT_FOUND => ScanError::NotFound(format!("{url}: HTTP {status}")),
        _ => ScanError::Network(format!("{url}: HTTP {status}")),
    })
}
