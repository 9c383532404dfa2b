//! Board snapshot construction.
//!
//! [`build`] is a pure function from a board configuration and a
//! point-in-time issue list to an immutable [`BoardSnapshot`]:
//!
//! 1. **Classify**: every issue is resolved to a column through the
//!    configuration's project/status/type mappings. Issues the board does
//!    not model are dropped into [`BoardSnapshot::excluded`]; that is not
//!    an error.
//! 2. **Order**: within a column, issues sort by ascending rank token,
//!    ties broken by key. Issues without a rank go last, by key.
//! 3. **Version**: the snapshot gets `last_version + 1`, or 1 for the
//!    first build of a board.
//!
//! The same inputs always yield the same snapshot; [`BoardSnapshot::digest`]
//! makes that cheap to check.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;
use crate::model::{BoardConfiguration, Issue, compare_ranks};

/// Where an issue sits on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Placement {
    /// Column index in configuration order.
    pub column: usize,
    /// Zero-based position within the column.
    pub index: usize,
}

/// The ordered issue keys of one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnIssues {
    pub name: String,
    pub backlog: bool,
    pub keys: Vec<String>,
}

/// An issue together with its placement in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedIssue {
    pub issue: Issue,
    pub placement: Placement,
}

/// Immutable, versioned materialization of a board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub code: String,
    pub version: u64,
    /// Every configured column, in configuration order, empty ones included.
    pub columns: Vec<ColumnIssues>,
    /// Every placed issue keyed by issue key.
    pub issues: BTreeMap<String, PlacedIssue>,
    /// Keys of fetched issues the board does not model, sorted.
    pub excluded: Vec<String>,
    pub priorities: Vec<String>,
    pub issue_types: Vec<String>,
}

impl BoardSnapshot {
    #[must_use]
    pub fn issue(&self, key: &str) -> Option<&PlacedIssue> {
        self.issues.get(key)
    }

    #[must_use]
    pub fn placement(&self, key: &str) -> Option<Placement> {
        self.issues.get(key).map(|p| p.placement)
    }

    /// Keys of the column called `name`, if the board has it.
    #[must_use]
    pub fn column_keys(&self, name: &str) -> Option<&[String]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.keys.as_slice())
    }

    /// Number of issues placed on the board.
    #[must_use]
    pub fn len(&self) -> usize {
        self.issues.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Content digest over columns, issues and exclusions.
    ///
    /// The version is not part of the digest, so two builds of identical
    /// inputs hash the same even when published under different versions.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.code.as_bytes());
        for column in &self.columns {
            hasher.update(b"\x1ecolumn\x1f");
            hasher.update(column.name.as_bytes());
            for key in &column.keys {
                hasher.update(b"\x1f");
                hasher.update(key.as_bytes());
            }
        }
        for (key, placed) in &self.issues {
            hasher.update(b"\x1eissue\x1f");
            hasher.update(key.as_bytes());
            // Issue serialization cannot fail: all fields are strings and lists.
            if let Ok(bytes) = serde_json::to_vec(&placed.issue) {
                hasher.update(&bytes);
            }
        }
        hasher.update(b"\x1eexcluded");
        for key in &self.excluded {
            hasher.update(b"\x1f");
            hasher.update(key.as_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }
}

/// Build a snapshot of `config` from `issues`.
///
/// When the source returns the same key more than once, the last record
/// wins.
///
/// # Errors
///
/// Returns [`crate::BoardError::Configuration`] if `config` fails validation.
pub fn build(
    config: &BoardConfiguration,
    issues: impl IntoIterator<Item = Issue>,
    last_version: Option<u64>,
) -> Result<BoardSnapshot> {
    config.validate()?;

    let mut unique: BTreeMap<String, Issue> = BTreeMap::new();
    for issue in issues {
        if let Some(previous) = unique.insert(issue.key.clone(), issue) {
            tracing::warn!(
                board = %config.code,
                key = %previous.key,
                "issue source returned duplicate key, keeping last record"
            );
        }
    }

    let mut buckets: Vec<Vec<Issue>> = vec![Vec::new(); config.columns.len()];
    let mut excluded = Vec::new();
    for (key, issue) in unique {
        match config.resolve_column(&issue) {
            Some(column) => buckets[column].push(issue),
            None => excluded.push(key),
        }
    }

    let mut columns = Vec::with_capacity(buckets.len());
    let mut placed = BTreeMap::new();
    for (column, (definition, mut bucket)) in config.columns.iter().zip(buckets).enumerate() {
        bucket.sort_by(|a, b| {
            compare_ranks(a.rank.as_ref(), b.rank.as_ref()).then_with(|| a.key.cmp(&b.key))
        });

        let keys = bucket.iter().map(|i| i.key.clone()).collect();
        for (index, issue) in bucket.into_iter().enumerate() {
            placed.insert(
                issue.key.clone(),
                PlacedIssue {
                    issue,
                    placement: Placement { column, index },
                },
            );
        }
        columns.push(ColumnIssues {
            name: definition.name.clone(),
            backlog: definition.backlog,
            keys,
        });
    }

    let version = last_version.map_or(1, |v| v + 1);
    tracing::debug!(
        board = %config.code,
        version,
        issues = placed.len(),
        excluded = excluded.len(),
        "built board snapshot"
    );

    Ok(BoardSnapshot {
        code: config.code.clone(),
        version,
        columns,
        issues: placed,
        excluded,
        priorities: config.priorities.clone(),
        issue_types: config.issue_types.clone(),
    })
}
