//! Deterministic path classifier.

use regex::RegexSet;

use super::{Classifier, ClassifierError};
use crate::models::Discovery;

/// Path substrings that mark test, fixture, vendored and doc trees.
/// Matched against `/` + the lowercased relative path.
pub const DEFAULT_DENYLIST: &[&str] = &[
    "/test/",
    "/tests/",
    "/spec/",
    "/__tests__/",
    "/fixtures/",
    "/testdata/",
    "/mocks/",
    "/examples/",
    "/samples/",
    "/docs/",
    "/node_modules/",
    "/vendor/",
    "/third_party/",
    "/.venv/",
];

/// File-name patterns for documentation, test modules and data dumps.
const FILE_PATTERNS: &[&str] = &[
    r"(?i)\.(md|rst|adoc|txt|html?|ipynb|csv|svg|lock)$",
    r"(?i)(^|/)(readme|changelog|license|authors)[^/]*$",
    r"(?i)(^|/)test_[^/]*$",
    r"(?i)(^|/)[^/]*[._-](test|spec)\.[a-z0-9]+$",
    r"(?i)(^|/)[^/]*\.min\.(js|css)$",
];

/// Marks discoveries whose file path looks like tests, docs or vendored
/// code.
#[derive(Debug, Clone)]
pub struct PathModel {
    denylist: Vec<String>,
    files: RegexSet,
}

impl PathModel {
    /// Default deny-list extended with `extra` substrings.
    pub fn new(extra: &[String]) -> Result<Self, ClassifierError> {
        let files = RegexSet::new(FILE_PATTERNS).map_err(|e| ClassifierError::InvalidData {
            name: "path_model".to_string(),
            reason: e.to_string(),
        })?;
        let denylist = DEFAULT_DENYLIST
            .iter()
            .map(|s| s.to_string())
            .chain(extra.iter().map(|s| s.to_lowercase()))
            .collect();
        Ok(Self { denylist, files })
    }

    pub fn matches_path(&self, file_name: &str) -> bool {
        let path = format!("/{}", file_name.trim_start_matches("./").replace('\\', "/").to_lowercase());
        self.denylist.iter().any(|s| path.contains(s.as_str())) || self.files.is_match(&path)
    }
}

impl Classifier for PathModel {
    fn name(&self) -> &str {
        "path_model"
    }

    fn is_false_positive(&self, discovery: &Discovery) -> Result<bool, ClassifierError> {
        Ok(self.matches_path(&discovery.file_name))
    }
}
