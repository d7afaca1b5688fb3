//! Rule files, the compiled multi-pattern matcher, and the per-scan
//! result handler that turns raw matches into discovery records.

pub mod file;
pub mod handler;
pub mod matcher;

use std::path::PathBuf;

use thiserror::Error;

pub use file::{export_rules, load_rules_file, parse_rules, write_rules_file};
pub use handler::{MatchContext, ResultHandler};
pub use matcher::RuleSet;

/// Errors raised while loading or compiling rules.
#[derive(Error, Debug)]
pub enum RuleError {
    #[error("rule {rule_id} has an invalid pattern: {source}")]
    Compile {
        rule_id: i64,
        #[source]
        source: regex::Error,
    },

    #[error("rule set exceeds the matcher size limit: {0}")]
    TooLarge(String),

    #[error("rules file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("failed to parse rules file: {0}")]
    Parse(#[from] serde_yaml_ng::Error),

    #[error("rules file has no top-level 'rules' sequence")]
    MissingRules,

    #[error("rule entry {index} is missing required key '{key}'")]
    MissingKey { index: usize, key: &'static str },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
