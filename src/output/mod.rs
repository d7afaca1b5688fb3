//! Output renderers for stored discoveries: terminal and JSON.

pub mod json;
pub mod terminal;

use serde::Serialize;

use crate::models::{Discovery, FileSummary};

pub use json::JsonRenderer;
pub use terminal::TerminalRenderer;

/// One page of discoveries of a repository, with its per-file summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiscoveryReport {
    pub repo_url: String,
    /// Distinct `(snippet, state, rule_id)` tuples matching the filters,
    /// before pagination.
    pub total: i64,
    pub discoveries: Vec<Discovery>,
    pub files: Vec<FileSummary>,
}

/// Trait for rendering a discovery report to an output format.
pub trait OutputRenderer {
    fn render(&self, report: &DiscoveryReport) -> String;
}
