//! Discoveries, their workflow state, and the grouped views over them.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter};

use super::ModelError;

/// Workflow state of a discovery.
///
/// Any state may move to any other state, including `fixed` back to `new`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DiscoveryState {
    #[default]
    New,
    FalsePositive,
    Addressing,
    NotRelevant,
    Fixed,
}

impl std::str::FromStr for DiscoveryState {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "false_positive" => Ok(Self::FalsePositive),
            "addressing" => Ok(Self::Addressing),
            "not_relevant" => Ok(Self::NotRelevant),
            "fixed" => Ok(Self::Fixed),
            other => Err(ModelError::InvalidState(other.to_string())),
        }
    }
}

/// A persisted discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discovery {
    pub id: i64,
    pub file_name: String,
    /// Commit hash, or empty for non-git sources.
    pub commit_id: String,
    /// 1-based, relative to the post-image of the file at the scan point.
    pub line_number: i64,
    pub snippet: String,
    pub repo_url: String,
    /// `None` once the rule that produced it has been deleted.
    pub rule_id: Option<i64>,
    pub state: DiscoveryState,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// A discovery produced by a scanner, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NewDiscovery {
    pub file_name: String,
    pub commit_id: String,
    pub line_number: i64,
    pub snippet: String,
    pub rule_id: i64,
    pub state: DiscoveryState,
}

/// Discoveries collapsed on `(repo_url, file_name, snippet, state)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryGroup {
    pub repo_url: String,
    pub file_name: String,
    pub snippet: String,
    pub state: DiscoveryState,
    pub occurrences: i64,
}

/// Per-file discovery counts by state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSummary {
    pub file_name: String,
    pub new: i64,
    pub false_positive: i64,
    pub addressing: i64,
    pub not_relevant: i64,
    pub fixed: i64,
}

impl FileSummary {
    pub fn total(&self) -> i64 {
        self.new + self.false_positive + self.addressing + self.not_relevant + self.fixed
    }

    pub(crate) fn add(&mut self, state: DiscoveryState, count: i64) {
        match state {
            DiscoveryState::New => self.new += count,
            DiscoveryState::FalsePositive => self.false_positive += count,
            DiscoveryState::Addressing => self.addressing += count,
            DiscoveryState::NotRelevant => self.not_relevant += count,
            DiscoveryState::Fixed => self.fixed += count,
        }
    }
}

/// Column the first pagination step of `get_discoveries` is ordered by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OrderBy {
    Category,
    #[default]
    Snippet,
    State,
}

impl OrderBy {
    /// Sort key in the grouped page query; `category` is the aggregated
    /// rule category of the tuple.
    pub fn column(self) -> &'static str {
        match self {
            OrderBy::Category => "category",
            OrderBy::Snippet => "d.snippet",
            OrderBy::State => "d.state",
        }
    }
}

impl std::str::FromStr for OrderBy {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "category" => Ok(OrderBy::Category),
            "snippet" => Ok(OrderBy::Snippet),
            "state" => Ok(OrderBy::State),
            _ => Err(ModelError::InvalidOrderBy(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn keyword(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

impl std::str::FromStr for SortDirection {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            _ => Err(ModelError::InvalidDirection(s.to_string())),
        }
    }
}

/// Filters and pagination for `get_discoveries`.
///
/// Pagination applies to distinct `(snippet, state, rule_id)` tuples; every
/// occurrence of a selected tuple is returned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryQuery {
    pub file_name: Option<String>,
    pub state: Option<DiscoveryState>,
    /// Substring matched against snippet or file name.
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub order_by: Option<OrderBy>,
    pub direction: Option<SortDirection>,
}
