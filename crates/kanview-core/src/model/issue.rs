use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Opaque, externally supplied ordering token (e.g. a lexorank string).
///
/// Ranks compare lexicographically; the engine never interprets them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rank(String);

impl Rank {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Order two optional ranks so that a missing rank sorts after every present one.
#[must_use]
pub fn compare_ranks(a: Option<&Rank>, b: Option<&Rank>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// A point-in-time issue record as returned by an issue source.
///
/// Flat and immutable inside the engine: projects, assignees and components
/// are referenced by name only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub key: String,
    pub project: String,
    pub issue_type: String,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub assignee: Option<String>,
    /// Value of the board's rank custom field; `None` when absent or unreadable.
    #[serde(default)]
    pub rank: Option<Rank>,
    pub summary: String,
    pub status: String,
    #[serde(default)]
    pub components: Vec<String>,
}

impl Issue {
    /// Minimal issue used by adapters and tests; optional fields start empty.
    pub fn new(
        key: impl Into<String>,
        project: impl Into<String>,
        issue_type: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            project: project.into(),
            issue_type: issue_type.into(),
            priority: None,
            assignee: None,
            rank: None,
            summary: String::new(),
            status: status.into(),
            components: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_rank(mut self, rank: impl Into<String>) -> Self {
        self.rank = Some(Rank::new(rank));
        self
    }

    #[must_use]
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    #[must_use]
    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = Some(priority.into());
        self
    }

    #[must_use]
    pub fn with_components<I, S>(mut self, components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.components = components.into_iter().map(Into::into).collect();
        self
    }
}

/// The user on whose behalf a board is fetched or viewed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct User(String);

impl User {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
