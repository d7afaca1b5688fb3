//! YAML rule documents.
//!
//! ```yaml
//! rules:
//!   - regex: "password\\s*="
//!     category: password
//!     description: assignments to password variables
//! ```

use std::path::Path;

use serde::Serialize;
use serde_yaml_ng::Value;

use super::RuleError;
use crate::models::NewRule;

#[derive(Serialize)]
struct RulesDocument<'a> {
    rules: &'a [NewRule],
}

/// Parse a rules document.
///
/// Entries are validated one by one so a missing key is reported with the
/// position of the offending entry.
pub fn parse_rules(content: &str) -> Result<Vec<NewRule>, RuleError> {
    let doc: Value = serde_yaml_ng::from_str(content)?;
    let entries = doc
        .get("rules")
        .and_then(Value::as_sequence)
        .ok_or(RuleError::MissingRules)?;

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let regex = required(entry, index, "regex")?;
            let category = required(entry, index, "category")?;
            let description = entry
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string);
            Ok(NewRule {
                regex,
                category,
                description,
            })
        })
        .collect()
}

fn required(entry: &Value, index: usize, key: &'static str) -> Result<String, RuleError> {
    entry
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(RuleError::MissingKey { index, key })
}

/// Read and parse a rules file.
pub fn load_rules_file(path: &Path) -> Result<Vec<NewRule>, RuleError> {
    if !path.is_file() {
        return Err(RuleError::FileNotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;
    parse_rules(&content)
}

/// Render rules as a document accepted by [`parse_rules`].
pub fn export_rules(rules: &[NewRule]) -> Result<String, RuleError> {
    Ok(serde_yaml_ng::to_string(&RulesDocument { rules })?)
}

pub fn write_rules_file(path: &Path, rules: &[NewRule]) -> Result<(), RuleError> {
    let content = export_rules(rules)?;
    std::fs::write(path, content)?;
    Ok(())
}
