//! Diff worker: applies the matcher to the added rows of a diff.

use tracing::debug;

use super::parser::{added_lines, split_file_patches};
use crate::models::NewDiscovery;
use crate::rules::{MatchContext, ResultHandler, RuleSet};

const BINARY_SENTINEL: &str = "Binary files";

/// Scan one file's hunk body, tagging hits with `file_name` and `commit_id`.
pub fn scan_patch(rules: &RuleSet, handler: &mut ResultHandler, file_name: &str, commit_id: &str, patch: &str) {
    if patch.starts_with(BINARY_SENTINEL) {
        return;
    }
    for line in added_lines(patch) {
        handler.scan_line(
            rules,
            &MatchContext {
                snippet: line.content,
                file_name,
                commit_id,
                line_number: line.line_number,
            },
        );
    }
}

/// Scan raw `git diff` output. Invalid UTF-8 is replaced, binary files are
/// skipped.
pub fn scan_diff(rules: &RuleSet, diff: &[u8], commit_id: &str) -> Vec<NewDiscovery> {
    let text = String::from_utf8_lossy(diff);
    let mut handler = ResultHandler::new();
    for patch in split_file_patches(&text) {
        if patch.is_binary {
            debug!(file = patch.path(), commit = commit_id, "skipping binary file");
            continue;
        }
        scan_patch(rules, &mut handler, patch.path(), commit_id, &patch.body);
    }
    handler.into_discoveries()
}
