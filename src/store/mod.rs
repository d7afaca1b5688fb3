//! Persistence backends.
//!
//! [`Store`] is the capability set both backends provide: CRUD over rules,
//! repositories and discoveries, scan-marker accessors, and bulk inserts.
//! Each repository keeps one marker per [`MarkerKind`]. The embedded
//! backend ([`SqliteStore`]) persists the history marker as a timestamp;
//! the networked backend ([`PostgresStore`]) as a commit id.
//!
//! Backends surface failures as [`StoreError`]; the client layer turns them
//! into sentinel values.

pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{
    Discovery, DiscoveryGroup, DiscoveryQuery, DiscoveryState, FileSummary, MarkerKind, NewDiscovery,
    NewRule, Repo, Rule, ScanMarker,
};

pub use sqlite::SqliteStore;

#[cfg(feature = "postgres")]
pub use postgres::{PgSettings, PostgresStore};

/// Errors from a storage backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("a rule with regex '{0}' already exists")]
    DuplicateRule(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// Storage capability set shared by every backend.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a rule. Fails with [`StoreError::DuplicateRule`] when the
    /// regex is already registered.
    async fn add_rule(&self, rule: &NewRule) -> Result<i64, StoreError>;
    /// Delete a rule; its discoveries survive with a null rule id.
    async fn delete_rule(&self, id: i64) -> Result<bool, StoreError>;
    /// All rules, or those whose category equals `category`, by id.
    async fn get_rules(&self, category: Option<&str>) -> Result<Vec<Rule>, StoreError>;

    /// Register a repository. `false` if it already exists.
    async fn add_repo(&self, url: &str) -> Result<bool, StoreError>;
    /// Delete a repository and, by cascade, its discoveries.
    async fn delete_repo(&self, url: &str) -> Result<bool, StoreError>;
    async fn get_repo(&self, url: &str) -> Result<Option<Repo>, StoreError>;
    async fn get_repos(&self) -> Result<Vec<Repo>, StoreError>;
    /// Persist one of the scan markers of a repository.
    async fn update_marker(&self, url: &str, kind: MarkerKind, marker: &ScanMarker) -> Result<bool, StoreError>;
    /// Persist the history marker of a repository.
    async fn update_repo(&self, url: &str, marker: &ScanMarker) -> Result<bool, StoreError> {
        self.update_marker(url, MarkerKind::History, marker).await
    }

    /// Insert one discovery. `None` when an identical one already exists.
    async fn add_discovery(&self, repo_url: &str, discovery: &NewDiscovery) -> Result<Option<i64>, StoreError>;
    /// Insert a batch in one transaction, skipping duplicates. Returns the
    /// ids of the rows actually inserted.
    async fn add_discoveries(&self, repo_url: &str, batch: &[NewDiscovery]) -> Result<Vec<i64>, StoreError>;
    async fn get_discovery(&self, id: i64) -> Result<Option<Discovery>, StoreError>;
    async fn get_discoveries_by_ids(&self, ids: &[i64]) -> Result<Vec<Discovery>, StoreError>;
    /// Paginate over distinct `(snippet, state, rule_id)` tuples and return
    /// every occurrence of the selected tuples, with the total tuple count.
    async fn get_discoveries(
        &self,
        repo_url: &str,
        query: &DiscoveryQuery,
    ) -> Result<(i64, Vec<Discovery>), StoreError>;
    async fn get_discovery_group(
        &self,
        repo_url: &str,
        state: Option<DiscoveryState>,
    ) -> Result<Vec<DiscoveryGroup>, StoreError>;
    async fn get_files_summary(&self, repo_url: &str) -> Result<Vec<FileSummary>, StoreError>;

    /// `true` when the discovery exists, including when it already had `state`.
    async fn update_discovery(&self, id: i64, state: DiscoveryState) -> Result<bool, StoreError>;
    /// Returns the number of discoveries matched.
    async fn update_discoveries(&self, ids: &[i64], state: DiscoveryState) -> Result<usize, StoreError>;
    async fn update_discovery_group(
        &self,
        repo_url: &str,
        file_name: Option<&str>,
        snippet: Option<&str>,
        state: DiscoveryState,
    ) -> Result<usize, StoreError>;
    /// Delete every discovery of a repository, keeping the repository.
    async fn delete_discoveries(&self, repo_url: &str) -> Result<usize, StoreError>;

    /// Discoveries in state `new` within the scope, embeddings included.
    async fn get_pending_discoveries(
        &self,
        repo_url: &str,
        file_name: Option<&str>,
    ) -> Result<Vec<Discovery>, StoreError>;
    async fn set_embedding(&self, id: i64, embedding: &[f32]) -> Result<bool, StoreError>;
}

/// `WHERE` clause over `discoveries d` plus its text bind values.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Filters {
    pub sql: String,
    pub args: Vec<String>,
}

impl Filters {
    /// Repository, file, state and free-text filters of a discovery query.
    /// `placeholder(n)` renders the n-th (1-based) bind marker.
    pub fn for_query(repo_url: &str, query: &DiscoveryQuery, placeholder: fn(usize) -> String) -> Self {
        let mut clauses = Vec::new();
        let mut args = Vec::new();

        args.push(repo_url.to_string());
        clauses.push(format!("d.repo_url = {}", placeholder(args.len())));

        if let Some(file_name) = &query.file_name {
            args.push(file_name.clone());
            clauses.push(format!("d.file_name = {}", placeholder(args.len())));
        }
        if let Some(state) = query.state {
            args.push(state.to_string());
            clauses.push(format!("d.state = {}", placeholder(args.len())));
        }
        if let Some(search) = query.search.as_deref().filter(|s| !s.is_empty()) {
            args.push(like_pattern(search));
            let n = placeholder(args.len());
            clauses.push(format!(
                "(LOWER(d.snippet) LIKE {n} ESCAPE '\\' OR LOWER(d.file_name) LIKE {n} ESCAPE '\\')"
            ));
        }

        Self {
            sql: clauses.join(" AND "),
            args,
        }
    }
}

/// `%term%`, lowercased, with LIKE metacharacters escaped.
pub(crate) fn like_pattern(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    out.push('%');
    for c in term.to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

/// `ORDER BY` clause for the first pagination step. The secondary order is
/// always the snippet, ascending.
pub(crate) fn page_order(query: &DiscoveryQuery) -> String {
    let column = query.order_by.unwrap_or_default().column();
    let direction = query.direction.unwrap_or_default();
    format!("{column} {}, d.snippet ASC", direction.keyword())
}

#[cfg(feature = "postgres")]
pub(crate) fn parse_state(raw: &str) -> Result<DiscoveryState, StoreError> {
    raw.parse()
        .map_err(|e: crate::models::ModelError| StoreError::Corrupt(e.to_string()))
}

pub(crate) fn encode_embedding(embedding: &[f32]) -> Result<String, StoreError> {
    serde_json::to_string(embedding).map_err(|e| StoreError::Corrupt(e.to_string()))
}

pub(crate) fn decode_embedding(raw: Option<String>) -> Option<Vec<f32>> {
    raw.and_then(|text| serde_json::from_str(&text).ok())
}
