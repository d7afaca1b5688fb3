//! JSON output renderer.
//!
//! Outputs `{"repo_url": ..., "total": n, "discoveries": [...], "files": [...]}`.

use crate::output::{DiscoveryReport, OutputRenderer};

pub struct JsonRenderer;

impl OutputRenderer for JsonRenderer {
    fn render(&self, report: &DiscoveryReport) -> String {
        serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string())
    }
}
