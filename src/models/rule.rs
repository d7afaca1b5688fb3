//! Scanning rules.

use serde::{Deserialize, Serialize};

/// A stored rule. Immutable once inserted; `id` is assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    /// Case-insensitive pattern, unique across the rule set.
    pub regex: String,
    /// Free-form tag, may contain `/` (e.g. `password/generic`).
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A rule that has not been assigned an id yet.
///
/// This is also the on-disk shape of one entry of a rules YAML document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NewRule {
    pub regex: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl NewRule {
    pub fn new(regex: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            regex: regex.into(),
            category: category.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl From<&Rule> for NewRule {
    fn from(rule: &Rule) -> Self {
        Self {
            regex: rule.regex.clone(),
            category: rule.category.clone(),
            description: rule.description.clone(),
        }
    }
}
