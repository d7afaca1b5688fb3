//! Pre-commit entry point.

use std::path::Path;

use super::{Client, ClientError, ScanOptions};
use crate::classify::PathModel;
use crate::hook::Hook;

impl Client {
    /// Scan the staged changes of the repository containing `dir` with the
    /// selected rules; returns the hook's exit code.
    ///
    /// Nothing is persisted. The path classifier always runs.
    pub async fn pre_commit(
        &self,
        dir: &Path,
        options: &ScanOptions,
        no_interaction: bool,
    ) -> Result<i32, ClientError> {
        let rules = self.load_rules(options).await?;
        let paths = PathModel::new(&self.models.path_denylist)?;
        let hook = Hook::new(rules, paths).with_max_workers(self.scanner.max_workers);
        Ok(hook.run(dir, no_interaction).await?)
    }
}
