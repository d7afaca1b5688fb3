//! Model download.
//!
//! Model archives are `.tar.gz` files whose URL is held in an environment
//! variable named after the model (`snippet_model=https://…`). The archive
//! is unpacked into the models directory, where the classifier registry
//! finds it under `<models_dir>/<name>/`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use flate2::read::GzDecoder;
use thiserror::Error;
use tracing::{debug, info};

use crate::constants::USER_AGENT;
use crate::env::Env;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("no download URL for model '{name}' (set the {name} environment variable)")]
    UnknownModel { name: String },

    #[error("failed to download {url}: {reason}")]
    Http { url: String, reason: String },

    #[error("failed to extract archive: {0}")]
    Extract(String),

    #[error("failed to prepare {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Resolve the download URL of `name`: the variable of that exact name
/// first, then its uppercase form.
pub fn model_url(env: &Env, name: &str) -> Result<String, DownloadError> {
    [name.to_string(), name.to_uppercase()]
        .iter()
        .find_map(|key| env.var(key).ok().filter(|v| !v.trim().is_empty()))
        .map(|v| v.trim().to_string())
        .ok_or_else(|| DownloadError::UnknownModel {
            name: name.to_string(),
        })
}

/// Download the archive of `name` and unpack it into `models_dir`.
///
/// Returns the number of archive entries written.
pub async fn download_model(
    env: &Env,
    name: &str,
    models_dir: &Path,
    timeout: Duration,
) -> Result<usize, DownloadError> {
    let url = model_url(env, name)?;
    info!(model = name, url = %url, "downloading model");
    let bytes = fetch(&url, timeout).await?;
    debug!(model = name, bytes = bytes.len(), "archive downloaded");

    let dir = models_dir.to_path_buf();
    tokio::task::spawn_blocking(move || unpack(&bytes, &dir))
        .await
        .map_err(|e| DownloadError::Extract(format!("extraction task failed: {e}")))?
}

async fn fetch(url: &str, timeout: Duration) -> Result<Vec<u8>, DownloadError> {
    let http = |reason: String| DownloadError::Http {
        url: url.to_string(),
        reason,
    };
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| http(e.to_string()))?;
    let resp = client
        .get(url)
        .header("User-Agent", USER_AGENT)
        .send()
        .await
        .map_err(|e| http(e.to_string()))?;

    if !resp.status().is_success() {
        return Err(http(format!("HTTP {}", resp.status())));
    }

    resp.bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| http(e.to_string()))
}

/// Unpack a `.tar.gz` archive into `dir`. Entries that would land outside
/// `dir` are skipped by `tar`.
pub(crate) fn unpack(archive_bytes: &[u8], dir: &Path) -> Result<usize, DownloadError> {
    fs::create_dir_all(dir).map_err(|source| DownloadError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut archive = tar::Archive::new(GzDecoder::new(archive_bytes));
    let entries = archive
        .entries()
        .map_err(|e| DownloadError::Extract(format!("failed to read archive entries: {e}")))?;

    let mut written = 0;
    for entry in entries {
        let mut entry = entry.map_err(|e| DownloadError::Extract(format!("corrupt archive entry: {e}")))?;
        let unpacked = entry
            .unpack_in(dir)
            .map_err(|e| DownloadError::Extract(format!("failed to write entry: {e}")))?;
        if unpacked && entry.header().entry_type().is_file() {
            written += 1;
        }
    }

    if written == 0 {
        return Err(DownloadError::Extract("archive contains no files".to_string()));
    }
    Ok(written)
}
