//! The persistence client: CRUD over rules, repositories and discoveries,
//! plus the scan entry points that tie scanners, storage and classifiers
//! together.
//!
//! Storage failures on CRUD calls are logged and turned into sentinel
//! values (`false`, `None`, empty collections); scan entry points return
//! typed errors.

mod hook;
mod scan;
mod similar;

use std::path::Path;
use std::sync::Arc;

use indexmap::IndexSet;
use thiserror::Error;
use tracing::warn;

use crate::classify::{ClassifierError, ModelContext, ModelRegistry};
use crate::hook::HookError;
use crate::models::{
    Discovery, DiscoveryGroup, DiscoveryQuery, DiscoveryState, FileSummary, ModelError,
    NewDiscovery, NewRule, Repo, Rule,
};
use crate::rules::{RuleError, RuleSet, load_rules_file, write_rules_file};
use crate::scanner::{GitHubApi, HostingApi, ScanError, ScannerConfig};
use crate::similarity::{Embedder, HashingEmbedder, SimilarityError, validate_threshold};
use crate::store::{SqliteStore, Store, StoreError};

pub use scan::ScanOptions;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Similarity(#[from] SimilarityError),

    #[error(transparent)]
    Classifier(#[from] ClassifierError),

    #[error(transparent)]
    Hook(#[from] HookError),
}

#[derive(Clone)]
pub struct Client {
    store: Arc<dyn Store>,
    scanner: ScannerConfig,
    registry: ModelRegistry,
    models: ModelContext,
    embedder: Arc<dyn Embedder>,
    /// Threshold for propagating state changes to similar snippets; `None`
    /// leaves state changes local.
    similarity: Option<f32>,
    hosting: Option<Arc<dyn HostingApi>>,
}

impl Client {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            scanner: ScannerConfig::default(),
            registry: ModelRegistry::builtin(),
            models: ModelContext::default(),
            embedder: Arc::new(HashingEmbedder::default()),
            similarity: None,
            hosting: None,
        }
    }

    /// Client over the embedded store at `path`.
    pub fn open_sqlite(path: &Path) -> Result<Self, ClientError> {
        Ok(Self::new(Arc::new(SqliteStore::new(path)?)))
    }

    pub fn with_scanner_config(mut self, config: ScannerConfig) -> Self {
        self.scanner = config;
        self
    }

    pub fn with_models(mut self, models: ModelContext) -> Self {
        self.models = models;
        self
    }

    pub fn with_registry(mut self, registry: ModelRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = embedder;
        self
    }

    /// Propagate every state change to `new` discoveries whose snippet is
    /// more similar than `threshold` to the changed one.
    pub fn with_similarity(mut self, threshold: f32) -> Result<Self, ClientError> {
        self.similarity = Some(validate_threshold(threshold)?);
        Ok(self)
    }

    /// Use `api` instead of a REST client built from the scanner config.
    pub fn with_hosting(mut self, api: Arc<dyn HostingApi>) -> Self {
        self.hosting = Some(api);
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    fn hosting(&self) -> Result<Arc<dyn HostingApi>, ScanError> {
        if let Some(api) = &self.hosting {
            return Ok(Arc::clone(api));
        }
        let api = GitHubApi::new(
            &self.scanner.api_endpoint,
            self.scanner.git_token.clone(),
            self.scanner.api_timeout,
        )?;
        Ok(Arc::new(api))
    }

    // ── Rules ───────────────────────────────────────────────────────

    /// Register a rule after checking that its regex compiles.
    pub async fn add_rule(&self, regex: &str, category: &str, description: Option<&str>) -> Result<i64, ClientError> {
        RuleSet::compile(&[Rule {
            id: 0,
            regex: regex.to_string(),
            category: category.to_string(),
            description: None,
        }])?;
        let mut rule = NewRule::new(regex, category);
        rule.description = description.map(str::to_string);
        Ok(self.store.add_rule(&rule).await?)
    }

    /// Import every rule of a rules YAML file. Rules whose regex is already
    /// registered are skipped. Returns the ids of the inserted rules.
    pub async fn add_rules_from_file(&self, path: &Path) -> Result<Vec<i64>, ClientError> {
        let rules = load_rules_file(path)?;
        let mut ids = Vec::with_capacity(rules.len());
        for rule in &rules {
            match self
                .add_rule(&rule.regex, &rule.category, rule.description.as_deref())
                .await
            {
                Ok(id) => ids.push(id),
                Err(ClientError::Store(StoreError::DuplicateRule(regex))) => {
                    warn!(regex = regex.as_str(), "rule already registered, skipping");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(ids)
    }

    /// Write the stored rules (optionally one category) as a rules YAML file.
    pub async fn export_rules(&self, path: &Path, category: Option<&str>) -> Result<usize, ClientError> {
        let rules: Vec<NewRule> = self
            .store
            .get_rules(category)
            .await?
            .iter()
            .map(NewRule::from)
            .collect();
        write_rules_file(path, &rules)?;
        Ok(rules.len())
    }

    pub async fn delete_rule(&self, id: i64) -> bool {
        sentinel("delete_rule", self.store.delete_rule(id).await, false)
    }

    pub async fn get_rules(&self, category: Option<&str>) -> Vec<Rule> {
        sentinel("get_rules", self.store.get_rules(category).await, Vec::new())
    }

    // ── Repositories ────────────────────────────────────────────────

    pub async fn add_repo(&self, url: &str) -> bool {
        sentinel("add_repo", self.store.add_repo(url).await, false)
    }

    pub async fn delete_repo(&self, url: &str) -> bool {
        sentinel("delete_repo", self.store.delete_repo(url).await, false)
    }

    pub async fn get_repo(&self, url: &str) -> Option<Repo> {
        sentinel("get_repo", self.store.get_repo(url).await, None)
    }

    pub async fn get_repos(&self) -> Vec<Repo> {
        sentinel("get_repos", self.store.get_repos().await, Vec::new())
    }

    // ── Discoveries ─────────────────────────────────────────────────

    /// `None` on a duplicate or a storage failure.
    pub async fn add_discovery(&self, repo_url: &str, discovery: &NewDiscovery) -> Option<i64> {
        sentinel("add_discovery", self.store.add_discovery(repo_url, discovery).await, None)
    }

    pub async fn add_discoveries(&self, repo_url: &str, batch: &[NewDiscovery]) -> Vec<i64> {
        sentinel("add_discoveries", self.store.add_discoveries(repo_url, batch).await, Vec::new())
    }

    pub async fn get_discovery(&self, id: i64) -> Option<Discovery> {
        sentinel("get_discovery", self.store.get_discovery(id).await, None)
    }

    /// `(total distinct tuples, page rows)`.
    pub async fn get_discoveries(&self, repo_url: &str, query: &DiscoveryQuery) -> (i64, Vec<Discovery>) {
        sentinel(
            "get_discoveries",
            self.store.get_discoveries(repo_url, query).await,
            (0, Vec::new()),
        )
    }

    pub async fn get_discovery_group(&self, repo_url: &str, state: Option<DiscoveryState>) -> Vec<DiscoveryGroup> {
        sentinel(
            "get_discovery_group",
            self.store.get_discovery_group(repo_url, state).await,
            Vec::new(),
        )
    }

    pub async fn get_files_summary(&self, repo_url: &str) -> Vec<FileSummary> {
        sentinel("get_files_summary", self.store.get_files_summary(repo_url).await, Vec::new())
    }

    /// `false` for an unknown state name, a missing discovery, or a storage
    /// failure. Setting the current state again succeeds.
    ///
    /// With [`Client::with_similarity`], similar `new` snippets of the same
    /// repository follow the change.
    pub async fn update_discovery(&self, id: i64, state: &str) -> bool {
        let Some(state) = parse_state(state) else {
            return false;
        };
        if !sentinel("update_discovery", self.store.update_discovery(id, state).await, false) {
            return false;
        }
        if self.similarity.is_some() {
            if let Some(d) = self.get_discovery(id).await {
                self.propagate_change(&d.repo_url, None, &d.snippet, state).await;
            }
        }
        true
    }

    pub async fn update_discoveries(&self, ids: &[i64], state: &str) -> bool {
        let Some(state) = parse_state(state) else {
            return false;
        };
        if let Err(e) = self.store.update_discoveries(ids, state).await {
            return sentinel("update_discoveries", Err(e), false);
        }
        if self.similarity.is_some() {
            let changed = sentinel("update_discoveries", self.store.get_discoveries_by_ids(ids).await, Vec::new());
            let targets: IndexSet<(String, String)> =
                changed.into_iter().map(|d| (d.repo_url, d.snippet)).collect();
            for (repo_url, snippet) in &targets {
                self.propagate_change(repo_url, None, snippet, state).await;
            }
        }
        true
    }

    /// With [`Client::with_similarity`] and a `snippet`, similar `new`
    /// snippets in the same scope follow the change.
    pub async fn update_discovery_group(
        &self,
        repo_url: &str,
        file_name: Option<&str>,
        snippet: Option<&str>,
        state: &str,
    ) -> bool {
        let Some(state) = parse_state(state) else {
            return false;
        };
        if let Err(e) = self
            .store
            .update_discovery_group(repo_url, file_name, snippet, state)
            .await
        {
            return sentinel("update_discovery_group", Err(e), false);
        }
        if let Some(snippet) = snippet {
            self.propagate_change(repo_url, file_name, snippet, state).await;
        }
        true
    }
}

fn parse_state(raw: &str) -> Option<DiscoveryState> {
    match raw.parse() {
        Ok(state) => Some(state),
        Err(e) => {
            warn!(error = %e, "rejected state update");
            None
        }
    }
}

fn sentinel<T>(operation: &str, result: Result<T, StoreError>, fallback: T) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            warn!(operation, error = %e, "store operation failed");
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const REPO: &str = "https://example.test/acme/app";

    fn client() -> Client {
        Client::new(Arc::new(SqliteStore::in_memory().unwrap()))
    }

    fn found(line: i64, snippet: &str, rule_id: i64) -> NewDiscovery {
        NewDiscovery {
            file_name: "settings.py".to_string(),
            commit_id: "abc".to_string(),
            line_number: line,
            snippet: snippet.to_string(),
            rule_id,
            state: DiscoveryState::New,
        }
    }

    #[tokio::test]
    async fn invalid_regex_is_rejected() {
        let c = client();
        assert!(matches!(
            c.add_rule("(unclosed", "password", None).await,
            Err(ClientError::Rule(RuleError::Compile { .. }))
        ));
        assert!(c.get_rules(None).await.is_empty());
    }

    #[tokio::test]
    async fn state_transitions() {
        let c = client();
        let rule = c.add_rule("password", "password", None).await.unwrap();
        assert!(c.add_repo(REPO).await);
        let id = c.add_discovery(REPO, &found(1, "password = 1", rule)).await.unwrap();

        assert!(c.update_discovery(id, "addressing").await);
        assert!(!c.update_discovery(id, "bogus").await);
        assert_eq!(c.get_discovery(id).await.unwrap().state, DiscoveryState::Addressing);

        assert!(c.update_discovery(id, "fixed").await);
        assert!(c.update_discovery(id, "new").await);
        assert_eq!(c.get_discovery(id).await.unwrap().state, DiscoveryState::New);
    }

    #[tokio::test]
    async fn duplicate_and_orphan_discoveries_are_sentinels() {
        let c = client();
        let rule = c.add_rule("password", "password", None).await.unwrap();
        c.add_repo(REPO).await;
        let d = found(1, "password", rule);
        assert!(c.add_discovery(REPO, &d).await.is_some());
        assert_eq!(c.add_discovery(REPO, &d).await, None);
        assert_eq!(c.add_discovery("unknown", &d).await, None);
    }

    #[tokio::test]
    async fn group_fan_out() {
        let c = client();
        let rule = c.add_rule("password", "password", None).await.unwrap();
        c.add_repo(REPO).await;
        let ids = c
            .add_discoveries(
                REPO,
                &[
                    found(1, "password = x", rule),
                    found(2, "password = x", rule),
                    found(3, "password = x", rule),
                    found(4, "password = y", rule),
                ],
            )
            .await;
        assert_eq!(ids.len(), 4);

        assert!(
            c.update_discovery_group(REPO, Some("settings.py"), Some("password = x"), "false_positive")
                .await
        );
        for id in &ids[..3] {
            assert_eq!(c.get_discovery(*id).await.unwrap().state, DiscoveryState::FalsePositive);
        }
        assert_eq!(c.get_discovery(ids[3]).await.unwrap().state, DiscoveryState::New);
        assert!(!c.update_discovery_group(REPO, None, None, "closed").await);
    }

    #[tokio::test]
    async fn similarity_threshold_is_validated() {
        assert!(matches!(
            client().with_similarity(0.5),
            Err(ClientError::Similarity(SimilarityError::Threshold(..)))
        ));
        assert!(client().with_similarity(0.96).is_ok());
    }

    #[tokio::test]
    async fn rules_round_trip_through_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.yml");

        let source = client();
        source.add_rule("password", "password", Some("generic password")).await.unwrap();
        source.add_rule("AKIA[0-9A-Z]{16}", "key/aws", None).await.unwrap();
        assert_eq!(source.export_rules(&path, None).await.unwrap(), 2);

        let target = client();
        assert_eq!(target.add_rules_from_file(&path).await.unwrap().len(), 2);
        // re-import skips registered regexes
        assert!(target.add_rules_from_file(&path).await.unwrap().is_empty());

        let strip = |rules: Vec<Rule>| rules.iter().map(NewRule::from).collect::<Vec<_>>();
        assert_eq!(strip(source.get_rules(None).await), strip(target.get_rules(None).await));
    }

    #[tokio::test]
    async fn missing_rules_file() {
        let err = client()
            .add_rules_from_file(Path::new("/nonexistent/rules.yml"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Rule(RuleError::FileNotFound(_))));
    }
}
