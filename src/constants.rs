//! App-wide constants.
//!
//! Centralises the tool name, config paths, environment variable names,
//! and scan policy limits so a rename only requires changing this file.

/// Display name of the tool (lowercase).
pub const APP_NAME: &str = "secretsweep";

/// CLI version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// User agent sent to hosting APIs and model download servers.
pub const USER_AGENT: &str = concat!("secretsweep/", env!("CARGO_PKG_VERSION"));

/// Local config filename (e.g. `.secretsweep.toml` in repo root).
pub const CONFIG_FILENAME: &str = ".secretsweep.toml";

/// Directory name under `~/.config/` and `~/.local/share/`.
pub const CONFIG_DIR: &str = "secretsweep";

/// Added lines longer than this many bytes are never scanned.
///
/// Minified bundles and lockfiles put whole files on one line and
/// drown the results in noise.
pub const MAX_LINE_LEN: usize = 500;

/// Bytes read from the head of a file when deciding whether it is binary.
pub const BINARY_SNIFF_LEN: u64 = 8 * 1024;

/// Tree hash of the empty tree (SHA-1 object format).
pub const EMPTY_TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

/// Default hosting API endpoint for pull request and user scans.
pub const DEFAULT_API_ENDPOINT: &str = "https://api.github.com";

/// Default cosine similarity above which snippets are considered the same.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.96;

/// Lowest threshold the embedding model is calibrated for.
pub const MIN_SIMILARITY_THRESHOLD: f32 = 0.94;

// ── Environment variable names ──────────────────────────────────────

pub const ENV_LOG: &str = "SECRETSWEEP_LOG";
pub const ENV_DB_NAME: &str = "POSTGRES_DB";
pub const ENV_DB_USER: &str = "POSTGRES_USER";
pub const ENV_DB_PASSWORD: &str = "POSTGRES_PASSWORD";
pub const ENV_DB_HOST: &str = "DBHOST";
pub const ENV_DB_PORT: &str = "DBPORT";
pub const ENV_GIT_TOKEN: &str = "GIT_TOKEN";
pub const ENV_API_ENDPOINT: &str = "SECRETSWEEP_API_ENDPOINT";
pub const ENV_MODELS_DIR: &str = "SECRETSWEEP_MODELS_DIR";
