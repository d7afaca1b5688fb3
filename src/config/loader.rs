//! Config struct and loading logic.
//!
//! Priority (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables
//! 3. `.secretsweep.toml` in the working directory
//! 4. `~/.config/secretsweep/config.toml` (global defaults)
//! 5. Built-in defaults

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::classify::ModelContext;
use crate::constants::{
    CONFIG_DIR, DEFAULT_API_ENDPOINT, DEFAULT_SIMILARITY_THRESHOLD, ENV_API_ENDPOINT, ENV_DB_HOST,
    ENV_DB_NAME, ENV_DB_PASSWORD, ENV_DB_PORT, ENV_DB_USER, ENV_GIT_TOKEN, ENV_MODELS_DIR,
};
use crate::env::Env;
use crate::scanner::ScannerConfig;
use crate::similarity::{Embedder, HashingEmbedder};

/// Errors during config loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseFile {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("no database configured (pass --sqlite <path> or set {ENV_DB_NAME})")]
    NoDatabase,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub scan: ScanConfig,
    pub hosting: HostingConfig,
    pub models: ModelsConfig,
    pub similarity: SimilarityConfig,
}

/// Store selection. `sqlite` wins over the networked settings when set.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub sqlite: Option<PathBuf>,
    pub name: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("sqlite", &self.sqlite)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

#[cfg(feature = "postgres")]
impl DatabaseConfig {
    /// Connection settings for the networked store, if a database name is set.
    pub fn pg_settings(&self) -> Option<crate::store::PgSettings> {
        let database = self.name.clone()?;
        Some(crate::store::PgSettings {
            host: self.host.clone().unwrap_or_else(|| "localhost".to_string()),
            port: self.port.unwrap_or(5432),
            user: self.user.clone().unwrap_or_else(|| "postgres".to_string()),
            password: self.password.clone().unwrap_or_default(),
            database,
        })
    }
}

/// Scanner resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub max_workers: usize,
    pub clone_timeout_secs: u64,
    pub api_timeout_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            clone_timeout_secs: 300,
            api_timeout_secs: 30,
        }
    }
}

/// Hosting API and git credentials.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostingConfig {
    pub api_endpoint: String,
    pub git_token: Option<String>,
    pub git_username: Option<String>,
}

impl std::fmt::Debug for HostingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostingConfig")
            .field("api_endpoint", &self.api_endpoint)
            .field("git_token", &self.git_token.as_ref().map(|_| "[REDACTED]"))
            .field("git_username", &self.git_username)
            .finish()
    }
}

impl Default for HostingConfig {
    fn default() -> Self {
        Self {
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
            git_token: None,
            git_username: None,
        }
    }
}

/// Classifier data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Defaults to `~/.local/share/secretsweep/models`.
    pub dir: Option<PathBuf>,
    pub path_denylist: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    /// Cosine similarity above which a snippet follows a state change.
    pub threshold: f32,
    pub model: EmbeddingModel,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
            model: EmbeddingModel::default(),
        }
    }
}

/// Which embedder backs the similarity propagator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingModel {
    #[default]
    Hashing,
    /// ONNX sentence embeddings; needs the `fastembed` feature.
    Fastembed,
}

impl SimilarityConfig {
    /// The configured embedder. Falls back to hashing when the ONNX model
    /// cannot be loaded or the binary was built without it.
    pub fn embedder(&self) -> Arc<dyn Embedder> {
        match self.model {
            EmbeddingModel::Hashing => Arc::new(HashingEmbedder::default()),
            EmbeddingModel::Fastembed => fast_embedder(),
        }
    }
}

#[cfg(feature = "fastembed")]
fn fast_embedder() -> Arc<dyn Embedder> {
    match crate::similarity::FastEmbedder::new() {
        Ok(embedder) => Arc::new(embedder),
        Err(e) => {
            warn!(error = %e, "falling back to the hashing embedder");
            Arc::new(HashingEmbedder::default())
        }
    }
}

#[cfg(not(feature = "fastembed"))]
fn fast_embedder() -> Arc<dyn Embedder> {
    warn!("built without the fastembed feature, using the hashing embedder");
    Arc::new(HashingEmbedder::default())
}

impl Config {
    /// Load configuration with proper layering.
    ///
    /// Reads from global config, local config, then applies
    /// environment variable overrides.
    pub fn load(local_root: Option<&Path>, env: &Env) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                let global = Self::load_file(&global_path)?;
                config.merge(global);
            }
        }

        if let Some(root) = local_root {
            let local_path = root.join(crate::constants::CONFIG_FILENAME);
            if local_path.exists() {
                let local = Self::load_file(&local_path)?;
                config.merge(local);
            }
        }

        config.apply_env_vars(env);

        Ok(config)
    }

    fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::ParseFile {
            path: path.to_path_buf(),
            source: e,
        })
    }

    fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(CONFIG_DIR).join("config.toml"))
    }

    /// Merge another config into this one (other takes precedence for non-default values).
    fn merge(&mut self, other: Config) {
        let db = other.database;
        if db.sqlite.is_some() {
            self.database.sqlite = db.sqlite;
        }
        if db.name.is_some() {
            self.database.name = db.name;
        }
        if db.user.is_some() {
            self.database.user = db.user;
        }
        if db.password.is_some() {
            self.database.password = db.password;
        }
        if db.host.is_some() {
            self.database.host = db.host;
        }
        if db.port.is_some() {
            self.database.port = db.port;
        }

        let default_scan = ScanConfig::default();
        if other.scan.max_workers != default_scan.max_workers {
            self.scan.max_workers = other.scan.max_workers;
        }
        if other.scan.clone_timeout_secs != default_scan.clone_timeout_secs {
            self.scan.clone_timeout_secs = other.scan.clone_timeout_secs;
        }
        if other.scan.api_timeout_secs != default_scan.api_timeout_secs {
            self.scan.api_timeout_secs = other.scan.api_timeout_secs;
        }

        if other.hosting.api_endpoint != DEFAULT_API_ENDPOINT {
            self.hosting.api_endpoint = other.hosting.api_endpoint;
        }
        if other.hosting.git_token.is_some() {
            self.hosting.git_token = other.hosting.git_token;
        }
        if other.hosting.git_username.is_some() {
            self.hosting.git_username = other.hosting.git_username;
        }

        if other.models.dir.is_some() {
            self.models.dir = other.models.dir;
        }
        // Denylists accumulate across layers.
        for entry in other.models.path_denylist {
            if !self.models.path_denylist.contains(&entry) {
                self.models.path_denylist.push(entry);
            }
        }

        if other.similarity.threshold != DEFAULT_SIMILARITY_THRESHOLD {
            self.similarity.threshold = other.similarity.threshold;
        }
        if other.similarity.model != EmbeddingModel::default() {
            self.similarity.model = other.similarity.model;
        }
    }

    /// Apply environment variable overrides.
    fn apply_env_vars(&mut self, env: &Env) {
        let set = |name: &str| env.var(name).ok().filter(|v| !v.is_empty());

        if let Some(val) = set(ENV_DB_NAME) {
            self.database.name = Some(val);
        }
        if let Some(val) = set(ENV_DB_USER) {
            self.database.user = Some(val);
        }
        if let Some(val) = set(ENV_DB_PASSWORD) {
            self.database.password = Some(val);
        }
        if let Some(val) = set(ENV_DB_HOST) {
            self.database.host = Some(val);
        }
        if let Some(val) = set(ENV_DB_PORT) {
            match val.parse::<u16>() {
                Ok(port) => self.database.port = Some(port),
                Err(_) => warn!("ignoring invalid {ENV_DB_PORT} value: {val}"),
            }
        }
        if let Some(val) = set(ENV_GIT_TOKEN) {
            self.hosting.git_token = Some(val);
        }
        if let Some(val) = set(ENV_API_ENDPOINT) {
            self.hosting.api_endpoint = val;
        }
        if let Some(val) = set(ENV_MODELS_DIR) {
            self.models.dir = Some(PathBuf::from(val));
        }
    }

    /// Directory holding downloaded model data.
    pub fn models_dir(&self) -> PathBuf {
        self.models.dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(CONFIG_DIR)
                .join("models")
        })
    }

    pub fn model_context(&self) -> ModelContext {
        ModelContext {
            models_dir: self.models_dir(),
            path_denylist: self.models.path_denylist.clone(),
        }
    }

    pub fn scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            max_workers: self.scan.max_workers.max(1),
            clone_timeout: Duration::from_secs(self.scan.clone_timeout_secs),
            api_timeout: Duration::from_secs(self.scan.api_timeout_secs),
            git_token: self.hosting.git_token.clone(),
            git_username: self.hosting.git_username.clone(),
            api_endpoint: self.hosting.api_endpoint.clone(),
        }
    }
}
