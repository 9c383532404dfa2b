//! Change records between board snapshots.
//!
//! A [`ChangeRecord`] describes how to turn the board at `from_version`
//! into the board at `to_version`:
//!
//! - **added**: keys absent at `from_version`, with their new placement.
//! - **removed**: keys absent at `to_version`.
//! - **updated**: keys present at both ends whose tracked fields differ,
//!   or whose order relative to the rest of their column changed. A move is
//!   always an update carrying the new index, never a remove plus an add.
//!
//! # Applying a record
//!
//! Drop every removed and updated key from its column, then insert added
//! and updated keys at their new indices in ascending index order. That
//! reproduces the target layout exactly because [`diff`] guarantees that
//! the keys it leaves out keep their relative order.
//!
//! # Move detection
//!
//! Keys that stay in the same column are checked for relative moves with a
//! longest-increasing-subsequence pass over their old indices, read in new
//! order. Keys on the subsequence stay put; the rest are flagged
//! [`IssueField::Position`]. Inserting or removing a neighbour therefore
//! does not mark every issue below it as updated.

pub mod log;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::model::Issue;
use crate::snapshot::{BoardSnapshot, ColumnIssues, PlacedIssue, Placement};

/// Issue attributes tracked for change detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueField {
    Column,
    Position,
    Rank,
    Summary,
    Assignee,
    Priority,
    IssueType,
    Status,
    Project,
    Components,
}

/// An issue that appeared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddedIssue {
    pub key: String,
    pub placement: Placement,
    pub issue: Issue,
}

/// An issue that disappeared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedIssue {
    pub key: String,
    /// The issue as it was at the record's base version.
    pub previous: Issue,
    pub previous_placement: Placement,
}

/// An issue present at both ends of the record that changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatedIssue {
    pub key: String,
    pub placement: Placement,
    pub fields: BTreeSet<IssueField>,
    pub issue: Issue,
    /// The issue as it was at the record's base version.
    pub previous: Issue,
    pub previous_placement: Placement,
}

/// Delta between two board versions. Each list is sorted by key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub board: String,
    pub from_version: u64,
    pub to_version: u64,
    pub added: Vec<AddedIssue>,
    pub removed: Vec<RemovedIssue>,
    pub updated: Vec<UpdatedIssue>,
}

impl ChangeRecord {
    /// A record that changes nothing at `version`.
    pub fn empty(board: impl Into<String>, version: u64) -> Self {
        Self {
            board: board.into(),
            from_version: version,
            to_version: version,
            added: Vec::new(),
            removed: Vec::new(),
            updated: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }

    /// Total number of touched keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.updated.len()
    }
}

/// Compute the change record from `previous` to `current`.
#[must_use]
pub fn diff(previous: &BoardSnapshot, current: &BoardSnapshot) -> ChangeRecord {
    let mut added = Vec::new();
    let mut updated: BTreeMap<String, BTreeSet<IssueField>> = BTreeMap::new();

    for (key, now) in &current.issues {
        let Some(before) = previous.issues.get(key) else {
            added.push(AddedIssue {
                key: key.clone(),
                placement: now.placement,
                issue: now.issue.clone(),
            });
            continue;
        };

        let mut fields = field_changes(&before.issue, &now.issue);
        if before.placement.column != now.placement.column {
            fields.insert(IssueField::Column);
        }
        if !fields.is_empty() {
            updated.insert(key.clone(), fields);
        }
    }

    for key in moved_keys(previous, current) {
        updated.entry(key).or_default().insert(IssueField::Position);
    }

    let removed = previous
        .issues
        .iter()
        .filter(|(key, _)| !current.issues.contains_key(*key))
        .map(|(key, before)| RemovedIssue {
            key: key.clone(),
            previous: before.issue.clone(),
            previous_placement: before.placement,
        })
        .collect();

    let updated = updated
        .into_iter()
        .filter_map(|(key, fields)| {
            let now = current.issues.get(&key)?;
            let before = previous.issues.get(&key)?;
            Some(UpdatedIssue {
                placement: now.placement,
                fields,
                issue: now.issue.clone(),
                previous: before.issue.clone(),
                previous_placement: before.placement,
                key,
            })
        })
        .collect();

    ChangeRecord {
        board: current.code.clone(),
        from_version: previous.version,
        to_version: current.version,
        added,
        removed,
        updated,
    }
}

/// Fold consecutive records into one record ending at `current`.
///
/// The board at `from_version` is rebuilt by undoing `records` newest
/// first, then diffed against `current`. The net record therefore carries
/// only what differs between its two ends: a field that changed and
/// changed back is not reported, and positions come from one move
/// detection pass over the whole window. The caller is responsible for
/// checking that `records` are contiguous from `from_version` and end at
/// `current.version`.
#[must_use]
pub fn aggregate<'a>(
    from_version: u64,
    records: impl IntoIterator<Item = &'a ChangeRecord>,
    current: &BoardSnapshot,
) -> ChangeRecord {
    let records: Vec<&ChangeRecord> = records.into_iter().collect();
    let base = rewind(current, &records, from_version);
    diff(&base, current)
}

/// Undo `records` (oldest first, ending at `current`) to recover the
/// snapshot at `version`.
fn rewind(current: &BoardSnapshot, records: &[&ChangeRecord], version: u64) -> BoardSnapshot {
    let mut layout: Vec<Vec<String>> = current.columns.iter().map(|c| c.keys.clone()).collect();
    let mut images: BTreeMap<String, Issue> = current
        .issues
        .iter()
        .map(|(key, placed)| (key.clone(), placed.issue.clone()))
        .collect();

    for record in records.iter().rev() {
        let dropped: HashSet<&str> = record
            .added
            .iter()
            .map(|a| a.key.as_str())
            .chain(record.updated.iter().map(|u| u.key.as_str()))
            .collect();
        for keys in &mut layout {
            keys.retain(|k| !dropped.contains(k.as_str()));
        }
        for added in &record.added {
            images.remove(&added.key);
        }

        let mut restored: Vec<(Placement, &str, &Issue)> = record
            .removed
            .iter()
            .map(|r| (r.previous_placement, r.key.as_str(), &r.previous))
            .chain(
                record
                    .updated
                    .iter()
                    .map(|u| (u.previous_placement, u.key.as_str(), &u.previous)),
            )
            .collect();
        restored.sort_by_key(|(placement, _, _)| *placement);
        for (placement, key, previous) in restored {
            let Some(keys) = layout.get_mut(placement.column) else {
                continue;
            };
            keys.insert(placement.index.min(keys.len()), key.to_string());
            images.insert(key.to_string(), previous.clone());
        }
    }

    let mut issues = BTreeMap::new();
    for (column, keys) in layout.iter().enumerate() {
        for (index, key) in keys.iter().enumerate() {
            if let Some(issue) = images.remove(key) {
                issues.insert(
                    key.clone(),
                    PlacedIssue {
                        issue,
                        placement: Placement { column, index },
                    },
                );
            }
        }
    }

    BoardSnapshot {
        code: current.code.clone(),
        version,
        columns: current
            .columns
            .iter()
            .zip(layout)
            .map(|(column, keys)| ColumnIssues {
                name: column.name.clone(),
                backlog: column.backlog,
                keys,
            })
            .collect(),
        issues,
        excluded: Vec::new(),
        priorities: current.priorities.clone(),
        issue_types: current.issue_types.clone(),
    }
}

fn field_changes(before: &Issue, now: &Issue) -> BTreeSet<IssueField> {
    let mut fields = BTreeSet::new();
    let mut check = |changed: bool, field: IssueField| {
        if changed {
            fields.insert(field);
        }
    };
    check(before.rank != now.rank, IssueField::Rank);
    check(before.summary != now.summary, IssueField::Summary);
    check(before.assignee != now.assignee, IssueField::Assignee);
    check(before.priority != now.priority, IssueField::Priority);
    check(before.issue_type != now.issue_type, IssueField::IssueType);
    check(before.status != now.status, IssueField::Status);
    check(before.project != now.project, IssueField::Project);
    check(before.components != now.components, IssueField::Components);
    fields
}

/// Keys that stayed in their column but changed order relative to the rest.
fn moved_keys(previous: &BoardSnapshot, current: &BoardSnapshot) -> Vec<String> {
    let mut moved = Vec::new();
    for (column, now) in current.columns.iter().enumerate() {
        let stayed: Vec<(&String, usize)> = now
            .keys
            .iter()
            .filter_map(|key| {
                let before = previous.placement(key)?;
                (before.column == column).then_some((key, before.index))
            })
            .collect();

        let old_indices: Vec<usize> = stayed.iter().map(|(_, index)| *index).collect();
        let keep: HashSet<usize> = longest_increasing_subsequence(&old_indices)
            .into_iter()
            .collect();
        moved.extend(
            stayed
                .iter()
                .enumerate()
                .filter(|(position, _)| !keep.contains(position))
                .map(|(_, (key, _))| (*key).clone()),
        );
    }
    moved
}

/// Positions (into `values`) of one longest strictly increasing subsequence.
fn longest_increasing_subsequence(values: &[usize]) -> Vec<usize> {
    // tails[len] = position of the smallest tail of an increasing run of length len + 1
    let mut tails: Vec<usize> = Vec::new();
    let mut parent: Vec<Option<usize>> = vec![None; values.len()];

    for (position, value) in values.iter().enumerate() {
        let slot = tails.partition_point(|&t| values[t] < *value);
        if slot > 0 {
            parent[position] = Some(tails[slot - 1]);
        }
        if slot == tails.len() {
            tails.push(position);
        } else {
            tails[slot] = position;
        }
    }

    let mut run = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(position) = cursor {
        run.push(position);
        cursor = parent[position];
    }
    run.reverse();
    run
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BoardConfiguration, Column, ProjectRules, User};
    use crate::snapshot::build;

    fn config() -> BoardConfiguration {
        let mut projects = BTreeMap::new();
        projects.insert(
            "TST".to_string(),
            ProjectRules {
                status_columns: [
                    ("open".to_string(), "Backlog".to_string()),
                    ("doing".to_string(), "In Progress".to_string()),
                ]
                .into_iter()
                .collect(),
                type_columns: BTreeMap::new(),
            },
        );
        BoardConfiguration {
            code: "TST".to_string(),
            id: 1,
            name: String::new(),
            owner: User::new("owner"),
            rank_field: 1,
            priorities: vec![],
            issue_types: vec![],
            columns: vec![Column::new("Backlog"), Column::new("In Progress")],
            type_columns: BTreeMap::new(),
            projects,
        }
    }

    fn issue(key: &str, status: &str, rank: &str) -> Issue {
        Issue::new(key, "TST", "task", status).with_rank(rank)
    }

    fn snap(issues: Vec<Issue>, last: Option<u64>) -> BoardSnapshot {
        build(&config(), issues, last).unwrap()
    }

    #[test]
    fn lis_picks_longest_run() {
        assert_eq!(longest_increasing_subsequence(&[]), Vec::<usize>::new());
        assert_eq!(longest_increasing_subsequence(&[0, 1, 2]), vec![0, 1, 2]);
        assert_eq!(longest_increasing_subsequence(&[2, 0, 1]).len(), 2);
        assert_eq!(longest_increasing_subsequence(&[3, 1, 2, 0, 4]), vec![1, 2, 4]);
    }

    #[test]
    fn insert_between_does_not_update_neighbours() {
        let v1 = snap(
            vec![issue("K1", "open", "a"), issue("K2", "open", "b"), issue("K3", "open", "c")],
            None,
        );
        let v2 = snap(
            vec![issue("K1", "open", "a"), issue("K4", "open", "b5"), issue("K3", "open", "c")],
            Some(1),
        );

        let change = diff(&v1, &v2);
        assert_eq!(change.from_version, 1);
        assert_eq!(change.to_version, 2);
        assert_eq!(change.removed.len(), 1);
        assert_eq!(change.removed[0].key, "K2");
        assert_eq!(change.added.len(), 1);
        assert_eq!(change.added[0].key, "K4");
        assert_eq!(change.added[0].placement, Placement { column: 0, index: 1 });
        assert!(change.updated.is_empty());
    }

    #[test]
    fn rerank_is_an_update_not_remove_add() {
        let v1 = snap(vec![issue("K1", "open", "a"), issue("K2", "open", "b")], None);
        let v2 = snap(vec![issue("K1", "open", "c"), issue("K2", "open", "b")], Some(1));

        let change = diff(&v1, &v2);
        assert!(change.added.is_empty());
        assert!(change.removed.is_empty());
        assert_eq!(change.updated.len(), 1);
        let moved = &change.updated[0];
        assert!(moved.fields.contains(&IssueField::Rank));
        assert_eq!(moved.placement, Placement { column: 0, index: 1 });
    }

    #[test]
    fn column_change_is_flagged() {
        let v1 = snap(vec![issue("K1", "open", "a")], None);
        let v2 = snap(vec![issue("K1", "doing", "a")], Some(1));

        let change = diff(&v1, &v2);
        assert_eq!(change.updated.len(), 1);
        let fields = &change.updated[0].fields;
        assert!(fields.contains(&IssueField::Column));
        assert!(fields.contains(&IssueField::Status));
        assert_eq!(change.updated[0].previous_placement.column, 0);
    }

    #[test]
    fn identical_snapshots_diff_empty() {
        let issues = vec![issue("K1", "open", "a"), issue("K2", "doing", "b")];
        let v1 = snap(issues.clone(), None);
        let v2 = snap(issues, Some(1));
        let change = diff(&v1, &v2);
        assert!(change.is_empty());
        assert_eq!(change.to_version, 2);
    }

    #[test]
    fn relative_move_without_field_change_is_position_update() {
        // Hand-built snapshots: the builder never reorders without a rank
        // change, but the diff must not depend on that.
        let v1 = snap(vec![issue("K1", "open", "a"), issue("K2", "open", "b")], None);
        let mut v2 = v1.clone();
        v2.version = 2;
        v2.columns[0].keys.reverse();
        for (index, key) in v2.columns[0].keys.clone().iter().enumerate() {
            v2.issues.get_mut(key).unwrap().placement.index = index;
        }

        let change = diff(&v1, &v2);
        assert_eq!(change.updated.len(), 1);
        assert_eq!(
            change.updated[0].fields,
            BTreeSet::from([IssueField::Position])
        );
    }

    #[test]
    fn aggregate_reresolves_placements_against_current() {
        let v1 = snap(vec![issue("K1", "open", "b")], None);
        let v2 = snap(vec![issue("K1", "open", "b"), issue("K2", "open", "c")], Some(1));
        let v3 = snap(
            vec![issue("K0", "open", "a"), issue("K1", "open", "b"), issue("K2", "open", "c")],
            Some(2),
        );

        let records = [diff(&v1, &v2), diff(&v2, &v3)];
        let change = aggregate(1, &records, &v3);
        assert_eq!(change.from_version, 1);
        assert_eq!(change.to_version, 3);
        let k2 = change.added.iter().find(|a| a.key == "K2").unwrap();
        assert_eq!(k2.placement.index, 2);
        assert!(change.updated.is_empty());
        assert!(change.removed.is_empty());
    }

    #[test]
    fn aggregate_drops_transient_issues_and_keeps_first_prior_image() {
        let v1 = snap(vec![issue("K1", "open", "a")], None);
        let v2 = snap(
            vec![issue("K1", "open", "a").with_summary("one"), issue("T", "open", "b")],
            Some(1),
        );
        let v3 = snap(vec![issue("K1", "doing", "a").with_summary("two")], Some(2));

        let records = [diff(&v1, &v2), diff(&v2, &v3)];
        let change = aggregate(1, &records, &v3);
        assert!(change.added.is_empty());
        assert!(change.removed.is_empty());
        assert_eq!(change.updated.len(), 1);
        let k1 = &change.updated[0];
        assert_eq!(k1.previous.summary, "");
        assert_eq!(k1.previous_placement, Placement { column: 0, index: 0 });
        assert!(k1.fields.contains(&IssueField::Summary));
        assert!(k1.fields.contains(&IssueField::Column));
    }

    /// Apply `change` to a copy of `base` the way a client would.
    fn replay(base: &BoardSnapshot, change: &ChangeRecord) -> Vec<Vec<String>> {
        let mut view = crate::view::BoardView::full(base);
        view.apply(change).unwrap();
        view.columns.into_iter().map(|c| c.keys).collect()
    }

    fn layout(snapshot: &BoardSnapshot) -> Vec<Vec<String>> {
        snapshot.columns.iter().map(|c| c.keys.clone()).collect()
    }

    #[test]
    fn aggregate_of_remove_then_readd_is_an_update() {
        let v1 = snap(vec![issue("K1", "open", "a"), issue("K2", "open", "b")], None);
        let v2 = snap(vec![issue("K2", "open", "b")], Some(1));
        let v3 = snap(vec![issue("K1", "open", "c"), issue("K2", "open", "b")], Some(2));

        let records = [diff(&v1, &v2), diff(&v2, &v3)];
        let change = aggregate(1, &records, &v3);
        assert!(change.added.is_empty());
        assert!(change.removed.is_empty());
        let k1 = change.updated.iter().find(|u| u.key == "K1").unwrap();
        assert!(k1.fields.contains(&IssueField::Rank));
        assert_eq!(k1.placement, Placement { column: 0, index: 1 });
        assert_eq!(replay(&v1, &change), layout(&v3));
    }

    #[test]
    fn aggregate_omits_fields_that_changed_back() {
        let v1 = snap(vec![issue("K1", "open", "a").with_summary("x")], None);
        let v2 = snap(vec![issue("K1", "open", "a").with_summary("y")], Some(1));
        let v3 = snap(vec![issue("K1", "open", "a").with_summary("x")], Some(2));

        let records = [diff(&v1, &v2), diff(&v2, &v3)];
        assert_eq!(records[0].updated.len(), 1);
        let change = aggregate(1, &records, &v3);
        assert!(change.is_empty(), "net change should be empty: {change:?}");
        assert_eq!(change.to_version, 3);
    }

    #[test]
    fn aggregate_of_readd_at_same_place_is_empty() {
        let v1 = snap(
            vec![issue("K1", "open", "a"), issue("K2", "open", "b"), issue("K3", "open", "c")],
            None,
        );
        let v2 = snap(vec![issue("K1", "open", "a"), issue("K3", "open", "c")], Some(1));
        let v3 = snap(
            vec![issue("K1", "open", "a"), issue("K2", "open", "b"), issue("K3", "open", "c")],
            Some(2),
        );

        let records = [diff(&v1, &v2), diff(&v2, &v3)];
        let change = aggregate(1, &records, &v3);
        assert!(change.is_empty(), "net change should be empty: {change:?}");
    }

    #[test]
    fn aggregate_of_column_round_trip_tracks_order() {
        let v1 = snap(
            vec![issue("K1", "open", "a"), issue("K2", "open", "b"), issue("K3", "open", "c")],
            None,
        );
        let v2 = snap(
            vec![issue("K1", "doing", "a"), issue("K2", "open", "b"), issue("K3", "open", "c")],
            Some(1),
        );
        let v3 = snap(
            vec![issue("K1", "open", "d"), issue("K2", "open", "b"), issue("K3", "open", "c")],
            Some(2),
        );

        let records = [diff(&v1, &v2), diff(&v2, &v3)];
        let change = aggregate(1, &records, &v3);
        let k1 = change.updated.iter().find(|u| u.key == "K1").unwrap();
        assert!(!k1.fields.contains(&IssueField::Column));
        assert!(k1.fields.contains(&IssueField::Rank));
        assert_eq!(replay(&v1, &change), layout(&v3));
    }
}
