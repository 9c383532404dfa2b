//! Per-client views of a board.
//!
//! A [`BoardView`] is a snapshot projected through a per-issue predicate:
//! the requesting user's visibility, the backlog toggle and the board
//! filters of a [`ViewQuery`]. The same predicate is applied to change
//! records by [`project_changes`], so a client that keeps a view and
//! applies every projected change record stays identical to a freshly
//! projected view of the current snapshot.
//!
//! # Items that leave a view
//!
//! When an issue the client could see at its base version is no longer
//! admitted (permission, filter or backlog change), the projected record
//! reports it as **removed** even though the issue still exists on the
//! board. Issues the record touches that the client never saw are omitted.
//!
//! [`project_changes`] only sees issues whose data changed. An issue whose
//! data stayed put but whose visibility flipped is withdrawn by the engine
//! (`BoardEngine::get_changes`), which lists every issue hidden from the
//! user by visibility alone as removed.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::changes::{AddedIssue, ChangeRecord, RemovedIssue, UpdatedIssue};
use crate::error::{BoardError, Result};
use crate::model::Issue;
use crate::snapshot::{BoardSnapshot, ColumnIssues, PlacedIssue, Placement};

/// Client-side board filters.
///
/// Each dimension is a set of accepted values; an empty set accepts
/// everything. For assignees and components, `None` selects issues that
/// have no assignee / no component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardFilter {
    pub projects: BTreeSet<String>,
    pub priorities: BTreeSet<String>,
    pub issue_types: BTreeSet<String>,
    pub assignees: BTreeSet<Option<String>>,
    pub components: BTreeSet<Option<String>>,
}

impl BoardFilter {
    /// True when no dimension has a selection.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
            && self.priorities.is_empty()
            && self.issue_types.is_empty()
            && self.assignees.is_empty()
            && self.components.is_empty()
    }

    /// Whether `issue` passes every dimension that has a selection.
    #[must_use]
    pub fn matches(&self, issue: &Issue) -> bool {
        let project = self.projects.is_empty() || self.projects.contains(&issue.project);
        let priority = self.priorities.is_empty()
            || issue
                .priority
                .as_ref()
                .is_some_and(|p| self.priorities.contains(p));
        let issue_type = self.issue_types.is_empty() || self.issue_types.contains(&issue.issue_type);
        let assignee = self.assignees.is_empty() || self.assignees.contains(&issue.assignee);
        let component = self.components.is_empty()
            || if issue.components.is_empty() {
                self.components.contains(&None)
            } else {
                issue
                    .components
                    .iter()
                    .any(|c| self.components.contains(&Some(c.clone())))
            };

        project && priority && issue_type && assignee && component
    }
}

/// What a client asks to see of a board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewQuery {
    /// Include issues placed in backlog columns.
    #[serde(default = "default_true")]
    pub backlog: bool,
    #[serde(default)]
    pub filter: BoardFilter,
}

impl Default for ViewQuery {
    fn default() -> Self {
        Self {
            backlog: default_true(),
            filter: BoardFilter::default(),
        }
    }
}

impl ViewQuery {
    /// Everything except backlog columns.
    #[must_use]
    pub fn without_backlog() -> Self {
        Self {
            backlog: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: BoardFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Whether an issue placed in a (backlog or regular) column belongs in the view.
    #[must_use]
    pub fn admits(&self, issue: &Issue, in_backlog: bool) -> bool {
        (self.backlog || !in_backlog) && self.filter.matches(issue)
    }
}

const fn default_true() -> bool {
    true
}

/// A snapshot as seen by one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardView {
    pub code: String,
    pub version: u64,
    pub columns: Vec<ColumnIssues>,
    pub issues: BTreeMap<String, PlacedIssue>,
    pub priorities: Vec<String>,
    pub issue_types: Vec<String>,
}

impl BoardView {
    /// Project `snapshot` through `admits(issue, column)`.
    ///
    /// Every column is kept; placements are re-indexed within the view.
    pub fn project(snapshot: &BoardSnapshot, admits: impl Fn(&Issue, usize) -> bool) -> Self {
        let mut columns = Vec::with_capacity(snapshot.columns.len());
        let mut issues = BTreeMap::new();

        for (column, full) in snapshot.columns.iter().enumerate() {
            let mut keys = Vec::new();
            for key in &full.keys {
                let Some(placed) = snapshot.issues.get(key) else {
                    continue;
                };
                if !admits(&placed.issue, column) {
                    continue;
                }
                issues.insert(
                    key.clone(),
                    PlacedIssue {
                        issue: placed.issue.clone(),
                        placement: Placement {
                            column,
                            index: keys.len(),
                        },
                    },
                );
                keys.push(key.clone());
            }
            columns.push(ColumnIssues {
                name: full.name.clone(),
                backlog: full.backlog,
                keys,
            });
        }

        Self {
            code: snapshot.code.clone(),
            version: snapshot.version,
            columns,
            issues,
            priorities: snapshot.priorities.clone(),
            issue_types: snapshot.issue_types.clone(),
        }
    }

    /// The whole snapshot, unfiltered.
    #[must_use]
    pub fn full(snapshot: &BoardSnapshot) -> Self {
        Self::project(snapshot, |_, _| true)
    }

    #[must_use]
    pub fn column_keys(&self, name: &str) -> Option<&[String]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.keys.as_slice())
    }

    /// Distinct assignees on the view, sorted.
    #[must_use]
    pub fn assignees(&self) -> Vec<&str> {
        let set: BTreeSet<&str> = self
            .issues
            .values()
            .filter_map(|p| p.issue.assignee.as_deref())
            .collect();
        set.into_iter().collect()
    }

    /// Fast-forward this view by one change record.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::ViewMismatch`] if `change` does not start at
    /// this view's version or places an issue in a column the view lacks.
    /// The view is left untouched on error.
    pub fn apply(&mut self, change: &ChangeRecord) -> Result<()> {
        let mismatch = || BoardError::ViewMismatch {
            expected: change.from_version,
            actual: self.version,
        };
        if change.from_version != self.version {
            return Err(mismatch());
        }

        let mut inserts: Vec<(Placement, &str, &Issue)> = change
            .added
            .iter()
            .map(|a| (a.placement, a.key.as_str(), &a.issue))
            .chain(
                change
                    .updated
                    .iter()
                    .map(|u| (u.placement, u.key.as_str(), &u.issue)),
            )
            .collect();
        if inserts.iter().any(|(p, _, _)| p.column >= self.columns.len()) {
            return Err(mismatch());
        }
        inserts.sort_by_key(|(placement, _, _)| *placement);

        let dropped: HashSet<&str> = change
            .removed
            .iter()
            .map(|r| r.key.as_str())
            .chain(change.updated.iter().map(|u| u.key.as_str()))
            .collect();
        for column in &mut self.columns {
            column.keys.retain(|k| !dropped.contains(k.as_str()));
        }
        for key in &dropped {
            self.issues.remove(*key);
        }

        for (placement, key, issue) in inserts {
            let keys = &mut self.columns[placement.column].keys;
            let index = placement.index.min(keys.len());
            keys.insert(index, key.to_string());
            self.issues.insert(
                key.to_string(),
                PlacedIssue {
                    issue: issue.clone(),
                    placement,
                },
            );
        }

        for (column, entry) in self.columns.iter().enumerate() {
            for (index, key) in entry.keys.iter().enumerate() {
                if let Some(placed) = self.issues.get_mut(key) {
                    placed.placement = Placement { column, index };
                }
            }
        }
        self.version = change.to_version;
        Ok(())
    }
}

/// Project a change record onto a client view.
///
/// `current` must be the client's view of the record's target snapshot,
/// projected with the same `admits`. Prior images are judged with
/// `admits(previous, previous_placement.column)`; see the module docs for how issues
/// leaving the view are reported.
pub fn project_changes(
    change: &ChangeRecord,
    current: &BoardView,
    admits: impl Fn(&Issue, usize) -> bool,
) -> ChangeRecord {
    let mut projected = ChangeRecord::empty(change.board.clone(), change.from_version);
    projected.to_version = change.to_version;

    for added in &change.added {
        if let Some(now) = current.issues.get(&added.key) {
            projected.added.push(AddedIssue {
                key: added.key.clone(),
                placement: now.placement,
                issue: added.issue.clone(),
            });
        }
    }

    for removed in &change.removed {
        if admits(&removed.previous, removed.previous_placement.column) {
            projected.removed.push(removed.clone());
        }
    }

    for updated in &change.updated {
        let was_visible = admits(&updated.previous, updated.previous_placement.column);
        match (was_visible, current.issues.get(&updated.key)) {
            (true, Some(now)) => projected.updated.push(UpdatedIssue {
                placement: now.placement,
                ..updated.clone()
            }),
            (true, None) => projected.removed.push(RemovedIssue {
                key: updated.key.clone(),
                previous: updated.previous.clone(),
                previous_placement: updated.previous_placement,
            }),
            (false, Some(now)) => projected.added.push(AddedIssue {
                key: updated.key.clone(),
                placement: now.placement,
                issue: updated.issue.clone(),
            }),
            (false, None) => {}
        }
    }

    projected.added.sort_by(|a, b| a.key.cmp(&b.key));
    projected.removed.sort_by(|a, b| a.key.cmp(&b.key));
    projected
}
