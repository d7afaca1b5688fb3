//! Embedded single-file backend on SQLite.
//!
//! The schema is created on open. Foreign keys are enabled per connection so
//! deleting a repository cascades to its discoveries and deleting a rule
//! nulls `rule_id` on the discoveries it produced.
//!
//! rusqlite is synchronous: every call runs on the blocking pool so scans
//! sharing the runtime keep making progress while the store works.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use indexmap::IndexMap;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params, params_from_iter};
use tracing::debug;

use super::{Filters, Store, StoreError, decode_embedding, encode_embedding, page_order};
use crate::models::{
    Discovery, DiscoveryGroup, DiscoveryQuery, DiscoveryState, FileSummary, MarkerKind, NewDiscovery,
    NewRule, Repo, Rule, ScanMarker,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS repos (
    url           TEXT PRIMARY KEY,
    last_scan     INTEGER NOT NULL DEFAULT 0,
    last_snapshot TEXT,
    last_tree     INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS rules (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    regex       TEXT NOT NULL UNIQUE,
    category    TEXT NOT NULL,
    description TEXT
);

CREATE TABLE IF NOT EXISTS discoveries (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    file_name   TEXT NOT NULL,
    commit_id   TEXT NOT NULL,
    line_number INTEGER NOT NULL DEFAULT -1,
    snippet     TEXT NOT NULL,
    repo_url    TEXT NOT NULL REFERENCES repos(url) ON DELETE CASCADE,
    rule_id     INTEGER REFERENCES rules(id) ON DELETE SET NULL,
    state       TEXT NOT NULL DEFAULT 'new'
                CHECK (state IN ('new', 'false_positive', 'addressing', 'not_relevant', 'fixed')),
    timestamp   TEXT NOT NULL DEFAULT (datetime('now', 'localtime')),
    embedding   TEXT,
    UNIQUE (repo_url, file_name, commit_id, line_number, snippet, rule_id)
);

CREATE INDEX IF NOT EXISTS idx_discoveries_repo_state ON discoveries(repo_url, state);
"#;

/// Marker columns added after the first schema; older files get them on open.
const REPO_COLUMNS: &[(&str, &str)] = &[
    ("last_snapshot", "TEXT"),
    ("last_tree", "INTEGER NOT NULL DEFAULT 0"),
];

const REPO_SELECT: &str = "SELECT url, last_scan, last_snapshot, last_tree FROM repos";

const DISCOVERY_COLUMNS: &str =
    "d.id, d.file_name, d.commit_id, d.line_number, d.snippet, d.repo_url, d.rule_id, d.state, d.timestamp, d.embedding";

const INSERT_DISCOVERY: &str = "INSERT OR IGNORE INTO discoveries \
     (file_name, commit_id, line_number, snippet, repo_url, rule_id, state) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

impl ToSql for DiscoveryState {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let s: &str = self.as_ref();
        Ok(ToSqlOutput::from(s))
    }
}

impl FromSql for DiscoveryState {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: crate::models::ModelError| FromSqlError::Other(Box::new(e)))
    }
}

/// SQLite-backed [`Store`].
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file at `path`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "opening sqlite store");
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        add_missing_repo_columns(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn call<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut *guard)
        })
        .await
        .map_err(|e| StoreError::Database(format!("sqlite task failed: {e}")))?
    }
}

fn add_missing_repo_columns(conn: &Connection) -> Result<(), StoreError> {
    let existing: Vec<String> = {
        let mut stmt = conn.prepare("PRAGMA table_info(repos)")?;
        stmt.query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?
    };
    for (name, decl) in REPO_COLUMNS {
        if !existing.iter().any(|c| c == name) {
            debug!(column = name, "adding repos column");
            conn.execute_batch(&format!("ALTER TABLE repos ADD COLUMN {name} {decl};"))?;
        }
    }
    Ok(())
}

fn discovery_from_row(row: &Row<'_>) -> rusqlite::Result<Discovery> {
    Ok(Discovery {
        id: row.get(0)?,
        file_name: row.get(1)?,
        commit_id: row.get(2)?,
        line_number: row.get(3)?,
        snippet: row.get(4)?,
        repo_url: row.get(5)?,
        rule_id: row.get(6)?,
        state: row.get(7)?,
        timestamp: row.get(8)?,
        embedding: decode_embedding(row.get(9)?),
    })
}

fn rule_from_row(row: &Row<'_>) -> rusqlite::Result<Rule> {
    Ok(Rule {
        id: row.get(0)?,
        regex: row.get(1)?,
        category: row.get(2)?,
        description: row.get(3)?,
    })
}

fn repo_from_row(row: &Row<'_>) -> rusqlite::Result<Repo> {
    let snapshot: Option<String> = row.get(2)?;
    Ok(Repo {
        url: row.get(0)?,
        marker: ScanMarker::at(row.get(1)?),
        snapshot: ScanMarker {
            timestamp: 0,
            commit: snapshot,
        },
        tree: ScanMarker::at(row.get(3)?),
    })
}

fn placeholder(n: usize) -> String {
    format!("?{n}")
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

#[async_trait]
impl Store for SqliteStore {
    async fn add_rule(&self, rule: &NewRule) -> Result<i64, StoreError> {
        let rule = rule.clone();
        self.call(move |conn| {
            match conn.execute(
                "INSERT INTO rules (regex, category, description) VALUES (?1, ?2, ?3)",
                params![rule.regex, rule.category, rule.description],
            ) {
                Ok(_) => Ok(conn.last_insert_rowid()),
                Err(e) if is_constraint_violation(&e) => Err(StoreError::DuplicateRule(rule.regex)),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn delete_rule(&self, id: i64) -> Result<bool, StoreError> {
        self.call(move |conn| Ok(conn.execute("DELETE FROM rules WHERE id = ?1", params![id])? > 0))
            .await
    }

    async fn get_rules(&self, category: Option<&str>) -> Result<Vec<Rule>, StoreError> {
        let category = category.map(str::to_string);
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, regex, category, description FROM rules \
                 WHERE ?1 IS NULL OR category = ?1 ORDER BY id",
            )?;
            let rules = stmt
                .query_map(params![category], rule_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rules)
        })
        .await
    }

    async fn add_repo(&self, url: &str) -> Result<bool, StoreError> {
        let url = url.to_string();
        self.call(move |conn| {
            let n = conn.execute("INSERT OR IGNORE INTO repos (url) VALUES (?1)", params![url])?;
            Ok(n == 1)
        })
        .await
    }

    async fn delete_repo(&self, url: &str) -> Result<bool, StoreError> {
        let url = url.to_string();
        self.call(move |conn| Ok(conn.execute("DELETE FROM repos WHERE url = ?1", params![url])? > 0))
            .await
    }

    async fn get_repo(&self, url: &str) -> Result<Option<Repo>, StoreError> {
        let url = url.to_string();
        self.call(move |conn| {
            let repo = conn
                .query_row(&format!("{REPO_SELECT} WHERE url = ?1"), params![url], repo_from_row)
                .optional()?;
            Ok(repo)
        })
        .await
    }

    async fn get_repos(&self) -> Result<Vec<Repo>, StoreError> {
        self.call(|conn| {
            let mut stmt = conn.prepare(&format!("{REPO_SELECT} ORDER BY url"))?;
            let repos = stmt
                .query_map([], repo_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(repos)
        })
        .await
    }

    async fn update_marker(&self, url: &str, kind: MarkerKind, marker: &ScanMarker) -> Result<bool, StoreError> {
        let url = url.to_string();
        let marker = marker.clone();
        self.call(move |conn| {
            let n = match kind {
                MarkerKind::History => conn.execute(
                    "UPDATE repos SET last_scan = ?2 WHERE url = ?1",
                    params![url, marker.timestamp],
                )?,
                MarkerKind::Snapshot => conn.execute(
                    "UPDATE repos SET last_snapshot = ?2 WHERE url = ?1",
                    params![url, marker.commit],
                )?,
                MarkerKind::Tree => conn.execute(
                    "UPDATE repos SET last_tree = ?2 WHERE url = ?1",
                    params![url, marker.timestamp],
                )?,
            };
            Ok(n > 0)
        })
        .await
    }

    async fn add_discovery(&self, repo_url: &str, d: &NewDiscovery) -> Result<Option<i64>, StoreError> {
        let repo_url = repo_url.to_string();
        let d = d.clone();
        self.call(move |conn| {
            let n = conn.execute(
                INSERT_DISCOVERY,
                params![d.file_name, d.commit_id, d.line_number, d.snippet, repo_url, d.rule_id, d.state],
            )?;
            Ok((n == 1).then(|| conn.last_insert_rowid()))
        })
        .await
    }

    async fn add_discoveries(&self, repo_url: &str, batch: &[NewDiscovery]) -> Result<Vec<i64>, StoreError> {
        let repo_url = repo_url.to_string();
        let batch = batch.to_vec();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let mut ids = Vec::new();
            {
                let mut stmt = tx.prepare(INSERT_DISCOVERY)?;
                for d in &batch {
                    let n = stmt.execute(params![
                        d.file_name,
                        d.commit_id,
                        d.line_number,
                        d.snippet,
                        repo_url,
                        d.rule_id,
                        d.state
                    ])?;
                    if n == 1 {
                        ids.push(tx.last_insert_rowid());
                    }
                }
            }
            tx.commit()?;
            debug!(repo = repo_url.as_str(), offered = batch.len(), inserted = ids.len(), "stored discoveries");
            Ok(ids)
        })
        .await
    }

    async fn get_discovery(&self, id: i64) -> Result<Option<Discovery>, StoreError> {
        self.call(move |conn| {
            let found = conn
                .query_row(
                    &format!("SELECT {DISCOVERY_COLUMNS} FROM discoveries d WHERE d.id = ?1"),
                    params![id],
                    discovery_from_row,
                )
                .optional()?;
            Ok(found)
        })
        .await
    }

    async fn get_discoveries_by_ids(&self, ids: &[i64]) -> Result<Vec<Discovery>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = ids.to_vec();
        self.call(move |conn| {
            let marks: Vec<String> = (1..=ids.len()).map(placeholder).collect();
            let sql = format!(
                "SELECT {DISCOVERY_COLUMNS} FROM discoveries d WHERE d.id IN ({}) ORDER BY d.id",
                marks.join(", ")
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(ids.iter()), discovery_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn get_discoveries(
        &self,
        repo_url: &str,
        query: &DiscoveryQuery,
    ) -> Result<(i64, Vec<Discovery>), StoreError> {
        let filters = Filters::for_query(repo_url, query, placeholder);
        let order = page_order(query);
        let (limit, offset) = (query.limit, query.offset);

        self.call(move |conn| {
            let args: Vec<Value> = filters.args.iter().cloned().map(Value::Text).collect();
            let grouped = format!(
                "SELECT d.snippet, d.state, d.rule_id, MIN(r.category) AS category \
                 FROM discoveries d LEFT JOIN rules r ON r.id = d.rule_id \
                 WHERE {} GROUP BY d.snippet, d.state, d.rule_id",
                filters.sql
            );

            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM ({grouped})"),
                params_from_iter(args.iter()),
                |row| row.get(0),
            )?;

            let mut page_sql = format!("{grouped} ORDER BY {order}");
            let mut page_args = args.clone();
            if limit.is_some() || offset.is_some() {
                page_args.push(Value::Integer(limit.unwrap_or(-1)));
                page_sql.push_str(&format!(" LIMIT ?{}", page_args.len()));
                page_args.push(Value::Integer(offset.unwrap_or(0)));
                page_sql.push_str(&format!(" OFFSET ?{}", page_args.len()));
            }

            let page: Vec<(String, DiscoveryState, Option<i64>)> = {
                let mut stmt = conn.prepare(&page_sql)?;
                stmt.query_map(params_from_iter(page_args.iter()), |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .collect::<Result<Vec<_>, _>>()?
            };

            let n = args.len();
            let occurrences_sql = format!(
                "SELECT {DISCOVERY_COLUMNS} FROM discoveries d WHERE {} \
                 AND d.snippet = ?{} AND d.state = ?{} AND d.rule_id IS ?{} ORDER BY d.id",
                filters.sql,
                n + 1,
                n + 2,
                n + 3
            );
            let mut stmt = conn.prepare(&occurrences_sql)?;
            let mut rows = Vec::new();
            for (snippet, state, rule_id) in page {
                let mut tuple_args = args.clone();
                tuple_args.push(Value::Text(snippet));
                tuple_args.push(Value::Text(state.to_string()));
                tuple_args.push(rule_id.map_or(Value::Null, Value::Integer));
                let found = stmt
                    .query_map(params_from_iter(tuple_args.iter()), discovery_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.extend(found);
            }
            Ok((total, rows))
        })
        .await
    }

    async fn get_discovery_group(
        &self,
        repo_url: &str,
        state: Option<DiscoveryState>,
    ) -> Result<Vec<DiscoveryGroup>, StoreError> {
        let repo_url = repo_url.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT repo_url, file_name, snippet, state, COUNT(*) FROM discoveries \
                 WHERE repo_url = ?1 AND (?2 IS NULL OR state = ?2) \
                 GROUP BY repo_url, file_name, snippet, state \
                 ORDER BY file_name, snippet, state",
            )?;
            let groups = stmt
                .query_map(params![repo_url, state], |row| {
                    Ok(DiscoveryGroup {
                        repo_url: row.get(0)?,
                        file_name: row.get(1)?,
                        snippet: row.get(2)?,
                        state: row.get(3)?,
                        occurrences: row.get(4)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(groups)
        })
        .await
    }

    async fn get_files_summary(&self, repo_url: &str) -> Result<Vec<FileSummary>, StoreError> {
        let repo_url = repo_url.to_string();
        let counts = self
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT file_name, state, COUNT(*) FROM discoveries \
                     WHERE repo_url = ?1 GROUP BY file_name, state ORDER BY file_name",
                )?;
                let counts = stmt
                    .query_map(params![repo_url], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, DiscoveryState>(1)?, row.get::<_, i64>(2)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(counts)
            })
            .await?;

        let mut by_file: IndexMap<String, FileSummary> = IndexMap::new();
        for (file_name, state, count) in counts {
            by_file
                .entry(file_name.clone())
                .or_insert_with(|| FileSummary {
                    file_name,
                    ..FileSummary::default()
                })
                .add(state, count);
        }
        Ok(by_file.into_values().collect())
    }

    async fn update_discovery(&self, id: i64, state: DiscoveryState) -> Result<bool, StoreError> {
        self.call(move |conn| {
            let n = conn.execute("UPDATE discoveries SET state = ?2 WHERE id = ?1", params![id, state])?;
            Ok(n > 0)
        })
        .await
    }

    async fn update_discoveries(&self, ids: &[i64], state: DiscoveryState) -> Result<usize, StoreError> {
        let ids = ids.to_vec();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let mut updated = 0;
            {
                let mut stmt = tx.prepare("UPDATE discoveries SET state = ?2 WHERE id = ?1")?;
                for id in &ids {
                    updated += stmt.execute(params![id, state])?;
                }
            }
            tx.commit()?;
            Ok(updated)
        })
        .await
    }

    async fn update_discovery_group(
        &self,
        repo_url: &str,
        file_name: Option<&str>,
        snippet: Option<&str>,
        state: DiscoveryState,
    ) -> Result<usize, StoreError> {
        let repo_url = repo_url.to_string();
        let file_name = file_name.map(str::to_string);
        let snippet = snippet.map(str::to_string);
        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE discoveries SET state = ?1 WHERE repo_url = ?2 \
                 AND (?3 IS NULL OR file_name = ?3) AND (?4 IS NULL OR snippet = ?4)",
                params![state, repo_url, file_name, snippet],
            )?;
            Ok(n)
        })
        .await
    }

    async fn delete_discoveries(&self, repo_url: &str) -> Result<usize, StoreError> {
        let repo_url = repo_url.to_string();
        self.call(move |conn| {
            Ok(conn.execute("DELETE FROM discoveries WHERE repo_url = ?1", params![repo_url])?)
        })
        .await
    }

    async fn get_pending_discoveries(
        &self,
        repo_url: &str,
        file_name: Option<&str>,
    ) -> Result<Vec<Discovery>, StoreError> {
        let repo_url = repo_url.to_string();
        let file_name = file_name.map(str::to_string);
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DISCOVERY_COLUMNS} FROM discoveries d \
                 WHERE d.repo_url = ?1 AND d.state = 'new' AND (?2 IS NULL OR d.file_name = ?2) \
                 ORDER BY d.id"
            ))?;
            let rows = stmt
                .query_map(params![repo_url, file_name], discovery_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn set_embedding(&self, id: i64, embedding: &[f32]) -> Result<bool, StoreError> {
        let encoded = encode_embedding(embedding)?;
        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE discoveries SET embedding = ?2 WHERE id = ?1",
                params![id, encoded],
            )?;
            Ok(n > 0)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderBy, SortDirection};
    use pretty_assertions::assert_eq;

    const REPO: &str = "https://example.test/acme/app";

    fn found(file: &str, line: i64, snippet: &str, rule_id: i64) -> NewDiscovery {
        NewDiscovery {
            file_name: file.to_string(),
            commit_id: "c0ffee".to_string(),
            line_number: line,
            snippet: snippet.to_string(),
            rule_id,
            state: DiscoveryState::New,
        }
    }

    async fn seeded() -> (SqliteStore, i64, i64) {
        let store = SqliteStore::in_memory().unwrap();
        let pw = store.add_rule(&NewRule::new("password", "password")).await.unwrap();
        let key = store.add_rule(&NewRule::new("api_?key", "key")).await.unwrap();
        assert!(store.add_repo(REPO).await.unwrap());
        (store, pw, key)
    }

    #[tokio::test]
    async fn duplicate_rule_is_rejected() {
        let (store, _, _) = seeded().await;
        let err = store.add_rule(&NewRule::new("password", "other")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateRule(r) if r == "password"));
    }

    #[tokio::test]
    async fn rules_filter_by_exact_category() {
        let (store, pw, _) = seeded().await;
        store.add_rule(&NewRule::new("passwd", "password/generic")).await.unwrap();
        let rules = store.get_rules(Some("password")).await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, pw);
        assert_eq!(store.get_rules(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn add_repo_is_idempotent() {
        let (store, _, _) = seeded().await;
        assert!(!store.add_repo(REPO).await.unwrap());
        let repo = store.get_repo(REPO).await.unwrap().unwrap();
        assert!(repo.marker.is_beginning());
        assert!(store.update_repo(REPO, &ScanMarker::at(42)).await.unwrap());
        assert_eq!(store.get_repo(REPO).await.unwrap().unwrap().marker.timestamp, 42);
        assert!(!store.update_repo("missing", &ScanMarker::at(1)).await.unwrap());
    }

    #[tokio::test]
    async fn markers_are_stored_per_kind() {
        let (store, _, _) = seeded().await;
        store.update_repo(REPO, &ScanMarker::at(42)).await.unwrap();
        store
            .update_marker(REPO, MarkerKind::Snapshot, &ScanMarker::at(99).with_commit("c0ffee"))
            .await
            .unwrap();
        store.update_marker(REPO, MarkerKind::Tree, &ScanMarker::at(7)).await.unwrap();

        let repo = store.get_repo(REPO).await.unwrap().unwrap();
        assert_eq!(repo.marker, ScanMarker::at(42));
        assert_eq!(repo.snapshot.commit.as_deref(), Some("c0ffee"));
        assert_eq!(repo.tree.timestamp, 7);
    }

    #[tokio::test]
    async fn old_repos_table_gains_marker_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE repos (url TEXT PRIMARY KEY, last_scan INTEGER NOT NULL DEFAULT 0);
                 INSERT INTO repos (url, last_scan) VALUES ('r', 5);",
            )
            .unwrap();
        }
        let store = SqliteStore::new(&path).unwrap();
        let repo = store.get_repo("r").await.unwrap().unwrap();
        assert_eq!(repo.marker.timestamp, 5);
        assert!(repo.snapshot.is_beginning());
        assert!(store
            .update_marker("r", MarkerKind::Snapshot, &ScanMarker::beginning().with_commit("abc"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn duplicate_discovery_is_skipped() {
        let (store, pw, _) = seeded().await;
        let d = found("a.py", 3, "password = 1", pw);
        assert!(store.add_discovery(REPO, &d).await.unwrap().is_some());
        assert_eq!(store.add_discovery(REPO, &d).await.unwrap(), None);

        let ids = store
            .add_discoveries(REPO, &[d.clone(), found("a.py", 4, "password = 2", pw)])
            .await
            .unwrap();
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn discovery_for_unknown_repo_fails() {
        let (store, pw, _) = seeded().await;
        assert!(store.add_discovery("nope", &found("a", 1, "password", pw)).await.is_err());
    }

    #[tokio::test]
    async fn deleting_repo_cascades() {
        let (store, pw, _) = seeded().await;
        let id = store
            .add_discovery(REPO, &found("a.py", 1, "password", pw))
            .await
            .unwrap()
            .unwrap();
        assert!(store.delete_repo(REPO).await.unwrap());
        assert_eq!(store.get_discovery(id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn deleting_rule_nulls_rule_id() {
        let (store, pw, _) = seeded().await;
        let id = store
            .add_discovery(REPO, &found("a.py", 1, "password", pw))
            .await
            .unwrap()
            .unwrap();
        assert!(store.delete_rule(pw).await.unwrap());
        let d = store.get_discovery(id).await.unwrap().unwrap();
        assert_eq!(d.rule_id, None);
        assert_eq!(d.state, DiscoveryState::New);
    }

    #[tokio::test]
    async fn state_update_is_idempotent() {
        let (store, pw, _) = seeded().await;
        let id = store
            .add_discovery(REPO, &found("a.py", 1, "password", pw))
            .await
            .unwrap()
            .unwrap();
        assert!(store.update_discovery(id, DiscoveryState::Addressing).await.unwrap());
        assert!(store.update_discovery(id, DiscoveryState::Addressing).await.unwrap());
        assert!(!store.update_discovery(id + 100, DiscoveryState::Fixed).await.unwrap());
        let d = store.get_discovery(id).await.unwrap().unwrap();
        assert_eq!(d.state, DiscoveryState::Addressing);
    }

    #[tokio::test]
    async fn pagination_counts_distinct_tuples() {
        let (store, pw, key) = seeded().await;
        store
            .add_discoveries(
                REPO,
                &[
                    found("a.py", 1, "password = 1", pw),
                    found("b.py", 9, "password = 1", pw),
                    found("a.py", 2, "api_key = x", key),
                    found("c.py", 5, "zzz password", pw),
                ],
            )
            .await
            .unwrap();

        let (total, rows) = store
            .get_discoveries(
                REPO,
                &DiscoveryQuery {
                    limit: Some(1),
                    ..DiscoveryQuery::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(total, 3);
        // first tuple by snippet is "api_key = x"
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].snippet, "api_key = x");

        let (_, rows) = store
            .get_discoveries(
                REPO,
                &DiscoveryQuery {
                    limit: Some(1),
                    offset: Some(1),
                    ..DiscoveryQuery::default()
                },
            )
            .await
            .unwrap();
        let files: Vec<&str> = rows.iter().map(|d| d.file_name.as_str()).collect();
        assert_eq!(files, vec!["a.py", "b.py"]);

        let (total, rows) = store
            .get_discoveries(
                REPO,
                &DiscoveryQuery {
                    order_by: Some(OrderBy::Category),
                    direction: Some(SortDirection::Desc),
                    search: Some("ZZZ".to_string()),
                    ..DiscoveryQuery::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].file_name, "c.py");
    }

    #[tokio::test]
    async fn group_update_fans_out() {
        let (store, pw, _) = seeded().await;
        let mut batch: Vec<NewDiscovery> = (1..=3).map(|l| found("a.py", l, "password", pw)).collect();
        batch.push(found("a.py", 4, "password2", pw));
        store.add_discoveries(REPO, &batch).await.unwrap();

        let n = store
            .update_discovery_group(REPO, Some("a.py"), Some("password"), DiscoveryState::FalsePositive)
            .await
            .unwrap();
        assert_eq!(n, 3);

        let groups = store.get_discovery_group(REPO, None).await.unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].occurrences, 3);
        assert_eq!(groups[0].state, DiscoveryState::FalsePositive);
        assert_eq!(groups[1].state, DiscoveryState::New);

        let summary = store.get_files_summary(REPO).await.unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].false_positive, 3);
        assert_eq!(summary[0].new, 1);
    }

    #[tokio::test]
    async fn pending_discoveries_carry_embeddings() {
        let (store, pw, _) = seeded().await;
        let ids = store
            .add_discoveries(REPO, &[found("a.py", 1, "password", pw), found("b.py", 1, "password", pw)])
            .await
            .unwrap();
        assert!(store.set_embedding(ids[0], &[0.5, -0.25]).await.unwrap());
        store.update_discovery(ids[1], DiscoveryState::Fixed).await.unwrap();

        let pending = store.get_pending_discoveries(REPO, None).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].embedding, Some(vec![0.5, -0.25]));
        assert!(store.get_pending_discoveries(REPO, Some("b.py")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn batch_state_update_and_wipe() {
        let (store, pw, _) = seeded().await;
        let ids = store
            .add_discoveries(REPO, &[found("a.py", 1, "password", pw), found("a.py", 2, "password", pw)])
            .await
            .unwrap();
        assert_eq!(store.update_discoveries(&ids, DiscoveryState::NotRelevant).await.unwrap(), 2);
        let rows = store.get_discoveries_by_ids(&ids).await.unwrap();
        assert!(rows.iter().all(|d| d.state == DiscoveryState::NotRelevant));

        assert_eq!(store.delete_discoveries(REPO).await.unwrap(), 2);
        assert!(store.get_repo(REPO).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn schema_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweep.db");
        {
            let store = SqliteStore::new(&path).unwrap();
            store.add_repo(REPO).await.unwrap();
        }
        let store = SqliteStore::new(&path).unwrap();
        assert_eq!(store.get_repos().await.unwrap().len(), 1);
    }
}
