//! Shared types used across all modules.
//!
//! This module defines the core records (rules, repositories, discoveries)
//! and the query options the store understands. Other modules import from
//! here rather than reaching into each other's internals.

pub mod discovery;
pub mod repo;
pub mod rule;

use thiserror::Error;

pub use discovery::{
    Discovery, DiscoveryGroup, DiscoveryQuery, DiscoveryState, FileSummary, NewDiscovery, OrderBy,
    SortDirection,
};
pub use repo::{MarkerKind, Repo, ScanMarker};
pub use rule::{NewRule, Rule};

/// Errors raised while interpreting user-supplied model values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("invalid discovery state '{0}' (expected one of: new, false_positive, addressing, not_relevant, fixed)")]
    InvalidState(String),

    #[error("invalid order column '{0}' (expected one of: category, snippet, state)")]
    InvalidOrderBy(String),

    #[error("invalid sort direction '{0}' (expected asc or desc)")]
    InvalidDirection(String),
}
