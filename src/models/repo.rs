//! Repositories and their scan markers.

use serde::{Deserialize, Serialize};

/// A bound on the next incremental scan of a repository.
///
/// The embedded store persists the history marker as `timestamp`; the
/// networked store persists it as `commit`. Scanners accept either half: a
/// history scan resolves a commit to its committed date, a snapshot scan
/// diffs from the commit when one is known and scans cold otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanMarker {
    /// Unix seconds. `0` means "beginning of time".
    pub timestamp: i64,
    /// Commit id of the last scanned snapshot, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

impl ScanMarker {
    /// The marker of a repository that was never scanned.
    pub fn beginning() -> Self {
        Self::default()
    }

    pub fn at(timestamp: i64) -> Self {
        Self {
            timestamp,
            commit: None,
        }
    }

    pub fn with_commit(mut self, commit: impl Into<String>) -> Self {
        self.commit = Some(commit.into());
        self
    }

    pub fn is_beginning(&self) -> bool {
        self.timestamp == 0 && self.commit.is_none()
    }
}

/// The scan families that keep their own marker on a repository.
///
/// A snapshot or a tree walk says nothing about which commits of the
/// history were already diffed, so each family reads and advances only
/// its own slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    /// Commit-history sweeps.
    History,
    /// Branch or commit snapshots: the last scanned commit.
    Snapshot,
    /// Local directory walks: the start time of the last walk.
    Tree,
}

/// A scanned repository, keyed by URL or an opaque local identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    pub url: String,
    /// History marker.
    pub marker: ScanMarker,
    #[serde(default)]
    pub snapshot: ScanMarker,
    #[serde(default)]
    pub tree: ScanMarker,
}

impl Repo {
    /// A repository that was never scanned.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            marker: ScanMarker::beginning(),
            snapshot: ScanMarker::beginning(),
            tree: ScanMarker::beginning(),
        }
    }

    pub fn marker(&self, kind: MarkerKind) -> &ScanMarker {
        match kind {
            MarkerKind::History => &self.marker,
            MarkerKind::Snapshot => &self.snapshot,
            MarkerKind::Tree => &self.tree,
        }
    }
}
