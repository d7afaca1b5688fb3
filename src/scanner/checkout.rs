//! Scoped ownership of the repository a scan works on.
//!
//! A remote source is cloned into a scratch directory that is removed when
//! the [`Checkout`] is dropped, on success, error, and cancellation alike.

use std::path::Path;

use tempfile::TempDir;
use tracing::debug;

use super::{ScanError, ScannerConfig};
use crate::diff::GitRepo;

pub struct Checkout {
    repo: GitRepo,
    scratch: Option<TempDir>,
}

impl Checkout {
    /// Clone `url` into a fresh scratch directory.
    pub async fn clone_remote(url: &str, config: &ScannerConfig) -> Result<Self, ScanError> {
        let scratch = tempfile::Builder::new()
            .prefix("secretsweep-")
            .tempdir()?;
        let dest = scratch.path().join("repo");
        let repo = GitRepo::clone_remote(
            url,
            &dest,
            config.git_token.as_deref(),
            config.git_username.as_deref(),
            config.clone_timeout,
        )
        .await?;
        Ok(Self {
            repo,
            scratch: Some(scratch),
        })
    }

    /// Work on a local repository in place.
    pub async fn open_local(path: &Path, config: &ScannerConfig) -> Result<Self, ScanError> {
        if !path.exists() {
            return Err(ScanError::FileNotFound(path.to_path_buf()));
        }
        let repo = GitRepo::open(path, config.clone_timeout).await?;
        debug!(path = %path.display(), "opened local repository");
        Ok(Self {
            repo,
            scratch: None,
        })
    }

    /// Open `source` in place when `local`, otherwise clone it.
    pub async fn acquire(source: &str, local: bool, config: &ScannerConfig) -> Result<Self, ScanError> {
        if local {
            Self::open_local(Path::new(source), config).await
        } else {
            Self::clone_remote(source, config).await
        }
    }

    pub fn repo(&self) -> &GitRepo {
        &self.repo
    }

    pub fn is_scratch(&self) -> bool {
        self.scratch.is_some()
    }
}
