//! Networked backend on PostgreSQL.
//!
//! The history marker is persisted as the last scanned commit id
//! (`repos.last_commit`); its timestamp half is not stored. Snapshot and
//! tree markers have columns of their own.

use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row};
use tracing::debug;

use super::{
    Filters, Store, StoreError, decode_embedding, encode_embedding, page_order, parse_state,
};
use crate::models::{
    Discovery, DiscoveryGroup, DiscoveryQuery, DiscoveryState, FileSummary, MarkerKind, NewDiscovery,
    NewRule, Repo, Rule, ScanMarker,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS repos (
        url           TEXT PRIMARY KEY,
        last_commit   TEXT,
        last_snapshot TEXT,
        last_tree     BIGINT NOT NULL DEFAULT 0
    )",
    "ALTER TABLE repos ADD COLUMN IF NOT EXISTS last_snapshot TEXT",
    "ALTER TABLE repos ADD COLUMN IF NOT EXISTS last_tree BIGINT NOT NULL DEFAULT 0",
    "CREATE TABLE IF NOT EXISTS rules (
        id          BIGSERIAL PRIMARY KEY,
        regex       TEXT NOT NULL UNIQUE,
        category    TEXT NOT NULL,
        description TEXT
    )",
    "CREATE TABLE IF NOT EXISTS discoveries (
        id          BIGSERIAL PRIMARY KEY,
        file_name   TEXT NOT NULL,
        commit_id   TEXT NOT NULL,
        line_number BIGINT NOT NULL DEFAULT -1,
        snippet     TEXT NOT NULL,
        repo_url    TEXT NOT NULL REFERENCES repos(url) ON DELETE CASCADE,
        rule_id     BIGINT REFERENCES rules(id) ON DELETE SET NULL,
        state       TEXT NOT NULL DEFAULT 'new'
                    CHECK (state IN ('new', 'false_positive', 'addressing', 'not_relevant', 'fixed')),
        timestamp   TEXT NOT NULL DEFAULT to_char(now(), 'YYYY-MM-DD HH24:MI:SS'),
        embedding   TEXT,
        UNIQUE (repo_url, file_name, commit_id, line_number, snippet, rule_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_discoveries_repo_state ON discoveries(repo_url, state)",
];

const DISCOVERY_COLUMNS: &str =
    "d.id, d.file_name, d.commit_id, d.line_number, d.snippet, d.repo_url, d.rule_id, d.state, d.timestamp, d.embedding";

const INSERT_DISCOVERY: &str = "INSERT INTO discoveries \
     (file_name, commit_id, line_number, snippet, repo_url, rule_id, state) \
     VALUES ($1, $2, $3, $4, $5, $6, $7) ON CONFLICT DO NOTHING RETURNING id";

/// Connection parameters for [`PostgresStore::connect`].
#[derive(Debug, Clone, Default)]
pub struct PgSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

/// PostgreSQL-backed [`Store`].
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(settings: &PgSettings) -> Result<Self, StoreError> {
        let options = PgConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .username(&settings.user)
            .password(&settings.password)
            .database(&settings.database);
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    /// Connect with a `postgres://` URL.
    pub async fn connect_url(url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: PgPool) -> Result<Self, StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        debug!("postgres store ready");
        Ok(Self { pool })
    }
}

fn discovery_from_row(row: &PgRow) -> Result<Discovery, StoreError> {
    let state: String = row.try_get("state")?;
    Ok(Discovery {
        id: row.try_get("id")?,
        file_name: row.try_get("file_name")?,
        commit_id: row.try_get("commit_id")?,
        line_number: row.try_get("line_number")?,
        snippet: row.try_get("snippet")?,
        repo_url: row.try_get("repo_url")?,
        rule_id: row.try_get("rule_id")?,
        state: parse_state(&state)?,
        timestamp: row.try_get("timestamp")?,
        embedding: decode_embedding(row.try_get("embedding")?),
    })
}

fn repo_from_row(row: &PgRow) -> Result<Repo, StoreError> {
    let commit: Option<String> = row.try_get("last_commit")?;
    let snapshot: Option<String> = row.try_get("last_snapshot")?;
    Ok(Repo {
        url: row.try_get("url")?,
        marker: ScanMarker {
            timestamp: 0,
            commit,
        },
        snapshot: ScanMarker {
            timestamp: 0,
            commit: snapshot,
        },
        tree: ScanMarker::at(row.try_get("last_tree")?),
    })
}

fn placeholder(n: usize) -> String {
    format!("${n}")
}

fn bind_all<'q>(
    mut query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
    args: &'q [String],
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    for arg in args {
        query = query.bind(arg);
    }
    query
}

#[async_trait]
impl Store for PostgresStore {
    async fn add_rule(&self, rule: &NewRule) -> Result<i64, StoreError> {
        let row = sqlx::query(
            "INSERT INTO rules (regex, category, description) VALUES ($1, $2, $3) \
             ON CONFLICT (regex) DO NOTHING RETURNING id",
        )
        .bind(&rule.regex)
        .bind(&rule.category)
        .bind(&rule.description)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(row.try_get("id")?),
            None => Err(StoreError::DuplicateRule(rule.regex.clone())),
        }
    }

    async fn delete_rule(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM rules WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_rules(&self, category: Option<&str>) -> Result<Vec<Rule>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, regex, category, description FROM rules \
             WHERE $1::TEXT IS NULL OR category = $1 ORDER BY id",
        )
        .bind(category)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(Rule {
                    id: row.try_get("id")?,
                    regex: row.try_get("regex")?,
                    category: row.try_get("category")?,
                    description: row.try_get("description")?,
                })
            })
            .collect()
    }

    async fn add_repo(&self, url: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("INSERT INTO repos (url) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(url)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_repo(&self, url: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM repos WHERE url = $1")
            .bind(url)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_repo(&self, url: &str) -> Result<Option<Repo>, StoreError> {
        let row = sqlx::query("SELECT url, last_commit, last_snapshot, last_tree FROM repos WHERE url = $1")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(repo_from_row).transpose()
    }

    async fn get_repos(&self) -> Result<Vec<Repo>, StoreError> {
        let rows = sqlx::query("SELECT url, last_commit, last_snapshot, last_tree FROM repos ORDER BY url")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(repo_from_row).collect()
    }

    async fn update_marker(&self, url: &str, kind: MarkerKind, marker: &ScanMarker) -> Result<bool, StoreError> {
        let query = match kind {
            MarkerKind::History => sqlx::query("UPDATE repos SET last_commit = $2 WHERE url = $1")
                .bind(url)
                .bind(&marker.commit),
            MarkerKind::Snapshot => sqlx::query("UPDATE repos SET last_snapshot = $2 WHERE url = $1")
                .bind(url)
                .bind(&marker.commit),
            MarkerKind::Tree => sqlx::query("UPDATE repos SET last_tree = $2 WHERE url = $1")
                .bind(url)
                .bind(marker.timestamp),
        };
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_discovery(&self, repo_url: &str, d: &NewDiscovery) -> Result<Option<i64>, StoreError> {
        let row = sqlx::query(INSERT_DISCOVERY)
            .bind(&d.file_name)
            .bind(&d.commit_id)
            .bind(d.line_number)
            .bind(&d.snippet)
            .bind(repo_url)
            .bind(d.rule_id)
            .bind(d.state.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.try_get("id")).transpose().map_err(Into::into)
    }

    async fn add_discoveries(&self, repo_url: &str, batch: &[NewDiscovery]) -> Result<Vec<i64>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::new();
        for d in batch {
            let row = sqlx::query(INSERT_DISCOVERY)
                .bind(&d.file_name)
                .bind(&d.commit_id)
                .bind(d.line_number)
                .bind(&d.snippet)
                .bind(repo_url)
                .bind(d.rule_id)
                .bind(d.state.to_string())
                .fetch_optional(&mut *tx)
                .await?;
            if let Some(row) = row {
                ids.push(row.try_get("id")?);
            }
        }
        tx.commit().await?;
        debug!(repo = repo_url, offered = batch.len(), inserted = ids.len(), "stored discoveries");
        Ok(ids)
    }

    async fn get_discovery(&self, id: i64) -> Result<Option<Discovery>, StoreError> {
        let row = sqlx::query(&format!("SELECT {DISCOVERY_COLUMNS} FROM discoveries d WHERE d.id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(discovery_from_row).transpose()
    }

    async fn get_discoveries_by_ids(&self, ids: &[i64]) -> Result<Vec<Discovery>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!(
            "SELECT {DISCOVERY_COLUMNS} FROM discoveries d WHERE d.id = ANY($1) ORDER BY d.id"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(discovery_from_row).collect()
    }

    async fn get_discoveries(
        &self,
        repo_url: &str,
        query: &DiscoveryQuery,
    ) -> Result<(i64, Vec<Discovery>), StoreError> {
        let filters = Filters::for_query(repo_url, query, placeholder);
        let grouped = format!(
            "SELECT d.snippet, d.state, d.rule_id, MIN(r.category) AS category \
             FROM discoveries d LEFT JOIN rules r ON r.id = d.rule_id \
             WHERE {} GROUP BY d.snippet, d.state, d.rule_id",
            filters.sql
        );

        let count_sql = format!("SELECT COUNT(*) AS total FROM ({grouped}) AS page");
        let total: i64 = bind_all(sqlx::query(&count_sql), &filters.args)
            .fetch_one(&self.pool)
            .await?
            .try_get("total")?;

        let n = filters.args.len();
        let mut page_sql = format!("{grouped} ORDER BY {}", page_order(query));
        if query.limit.is_some() {
            page_sql.push_str(&format!(" LIMIT ${}", n + 1));
        }
        if query.offset.is_some() {
            let slot = n + 1 + usize::from(query.limit.is_some());
            page_sql.push_str(&format!(" OFFSET ${slot}"));
        }
        let mut page_query = bind_all(sqlx::query(&page_sql), &filters.args);
        if let Some(limit) = query.limit {
            page_query = page_query.bind(limit);
        }
        if let Some(offset) = query.offset {
            page_query = page_query.bind(offset);
        }
        let page = page_query.fetch_all(&self.pool).await?;

        let occurrences_sql = format!(
            "SELECT {DISCOVERY_COLUMNS} FROM discoveries d WHERE {} \
             AND d.snippet = ${} AND d.state = ${} AND d.rule_id IS NOT DISTINCT FROM ${} ORDER BY d.id",
            filters.sql,
            n + 1,
            n + 2,
            n + 3
        );
        let mut rows = Vec::new();
        for tuple in &page {
            let snippet: String = tuple.try_get("snippet")?;
            let state: String = tuple.try_get("state")?;
            let rule_id: Option<i64> = tuple.try_get("rule_id")?;
            let found = bind_all(sqlx::query(&occurrences_sql), &filters.args)
                .bind(snippet)
                .bind(state)
                .bind(rule_id)
                .fetch_all(&self.pool)
                .await?;
            for row in &found {
                rows.push(discovery_from_row(row)?);
            }
        }
        Ok((total, rows))
    }

    async fn get_discovery_group(
        &self,
        repo_url: &str,
        state: Option<DiscoveryState>,
    ) -> Result<Vec<DiscoveryGroup>, StoreError> {
        let rows = sqlx::query(
            "SELECT repo_url, file_name, snippet, state, COUNT(*) AS occurrences FROM discoveries \
             WHERE repo_url = $1 AND ($2::TEXT IS NULL OR state = $2) \
             GROUP BY repo_url, file_name, snippet, state \
             ORDER BY file_name, snippet, state",
        )
        .bind(repo_url)
        .bind(state.map(|s| s.to_string()))
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let state: String = row.try_get("state")?;
                Ok(DiscoveryGroup {
                    repo_url: row.try_get("repo_url")?,
                    file_name: row.try_get("file_name")?,
                    snippet: row.try_get("snippet")?,
                    state: parse_state(&state)?,
                    occurrences: row.try_get("occurrences")?,
                })
            })
            .collect()
    }

    async fn get_files_summary(&self, repo_url: &str) -> Result<Vec<FileSummary>, StoreError> {
        let rows = sqlx::query(
            "SELECT file_name, state, COUNT(*) AS n FROM discoveries \
             WHERE repo_url = $1 GROUP BY file_name, state ORDER BY file_name",
        )
        .bind(repo_url)
        .fetch_all(&self.pool)
        .await?;

        let mut by_file: IndexMap<String, FileSummary> = IndexMap::new();
        for row in &rows {
            let file_name: String = row.try_get("file_name")?;
            let state: String = row.try_get("state")?;
            let count: i64 = row.try_get("n")?;
            by_file
                .entry(file_name.clone())
                .or_insert_with(|| FileSummary {
                    file_name,
                    ..FileSummary::default()
                })
                .add(parse_state(&state)?, count);
        }
        Ok(by_file.into_values().collect())
    }

    async fn update_discovery(&self, id: i64, state: DiscoveryState) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE discoveries SET state = $2 WHERE id = $1")
            .bind(id)
            .bind(state.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_discoveries(&self, ids: &[i64], state: DiscoveryState) -> Result<usize, StoreError> {
        let result = sqlx::query("UPDATE discoveries SET state = $2 WHERE id = ANY($1)")
            .bind(ids)
            .bind(state.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn update_discovery_group(
        &self,
        repo_url: &str,
        file_name: Option<&str>,
        snippet: Option<&str>,
        state: DiscoveryState,
    ) -> Result<usize, StoreError> {
        let result = sqlx::query(
            "UPDATE discoveries SET state = $1 WHERE repo_url = $2 \
             AND ($3::TEXT IS NULL OR file_name = $3) AND ($4::TEXT IS NULL OR snippet = $4)",
        )
        .bind(state.to_string())
        .bind(repo_url)
        .bind(file_name)
        .bind(snippet)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn delete_discoveries(&self, repo_url: &str) -> Result<usize, StoreError> {
        let result = sqlx::query("DELETE FROM discoveries WHERE repo_url = $1")
            .bind(repo_url)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn get_pending_discoveries(
        &self,
        repo_url: &str,
        file_name: Option<&str>,
    ) -> Result<Vec<Discovery>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {DISCOVERY_COLUMNS} FROM discoveries d \
             WHERE d.repo_url = $1 AND d.state = 'new' AND ($2::TEXT IS NULL OR d.file_name = $2) \
             ORDER BY d.id"
        ))
        .bind(repo_url)
        .bind(file_name)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(discovery_from_row).collect()
    }

    async fn set_embedding(&self, id: i64, embedding: &[f32]) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE discoveries SET embedding = $2 WHERE id = $1")
            .bind(id)
            .bind(encode_embedding(embedding)?)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
