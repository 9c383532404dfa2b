//! Board definitions: columns, project participation and custom-field ids.
//!
//! A [`BoardConfiguration`] is plain data as stored by the configuration
//! collaborator. It is checked with [`BoardConfiguration::validate`] before
//! every snapshot build, so a malformed definition surfaces as
//! [`BoardError::Configuration`] on the rebuild that uses it instead of at
//! load time.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::error::{BoardError, Result};
use crate::model::issue::{Issue, User};

/// One board column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// Backlog columns are hidden from views that do not ask for the backlog.
    #[serde(default)]
    pub backlog: bool,
}

impl Column {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backlog: false,
        }
    }

    pub fn backlog(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backlog: true,
        }
    }
}

/// How issues of one project are placed on the board.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRules {
    /// Issue status → column name. Checked first.
    #[serde(default)]
    pub status_columns: BTreeMap<String, String>,
    /// Issue type → column name for this project only.
    #[serde(default)]
    pub type_columns: BTreeMap<String, String>,
}

/// Parsed description of one board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardConfiguration {
    /// Unique board code; immutable once the board exists.
    pub code: String,
    pub id: i64,
    #[serde(default)]
    pub name: String,
    /// Owning user. Issues are fetched on this user's behalf.
    pub owner: User,
    /// Custom field id holding the rank token.
    pub rank_field: u64,
    #[serde(default)]
    pub priorities: Vec<String>,
    #[serde(default)]
    pub issue_types: Vec<String>,
    pub columns: Vec<Column>,
    /// Issue type → default column, used when a project has no specific rule.
    #[serde(default)]
    pub type_columns: BTreeMap<String, String>,
    /// Participating projects keyed by project key.
    #[serde(default)]
    pub projects: BTreeMap<String, ProjectRules>,
}

impl BoardConfiguration {
    /// Parse a board definition from TOML.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::ConfigParse`] when the text is not a valid
    /// definition. Structural problems are left to [`Self::validate`].
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| BoardError::ConfigParse(e.to_string()))
    }

    /// Check the structural invariants the snapshot builder relies on.
    ///
    /// All problems are reported together, separated by `; `.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::Configuration`] listing every violation.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.code.trim().is_empty() {
            problems.push("board code is empty".to_string());
        }
        if self.rank_field == 0 {
            problems.push("rank custom field id is not set".to_string());
        }
        if self.columns.is_empty() {
            problems.push("no columns defined".to_string());
        }

        let mut names = HashSet::new();
        for column in &self.columns {
            if column.name.trim().is_empty() {
                problems.push("column with empty name".to_string());
            } else if !names.insert(column.name.as_str()) {
                problems.push(format!("duplicate column '{}'", column.name));
            }
        }

        if self
            .columns
            .iter()
            .skip_while(|c| c.backlog)
            .any(|c| c.backlog)
        {
            problems.push("backlog columns must come before all other columns".to_string());
        }

        let mut check_mapping = |scope: &str, mapping: &BTreeMap<String, String>, typed: bool| {
            for (from, column) in mapping {
                if !names.contains(column.as_str()) {
                    problems.push(format!("{scope}: '{from}' maps to unknown column '{column}'"));
                }
                if typed && !self.issue_types.is_empty() && !self.issue_types.contains(from) {
                    problems.push(format!("{scope}: unknown issue type '{from}'"));
                }
            }
        };

        check_mapping("type_columns", &self.type_columns, true);
        for (project, rules) in &self.projects {
            check_mapping(
                &format!("projects.{project}.status_columns"),
                &rules.status_columns,
                false,
            );
            check_mapping(
                &format!("projects.{project}.type_columns"),
                &rules.type_columns,
                true,
            );
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(BoardError::configuration(&self.code, problems.join("; ")))
        }
    }

    /// Index of the column called `name`.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Resolve the column an issue belongs in, or `None` if the board does not
    /// model it.
    ///
    /// Precedence: the project's status mapping, then the project's type
    /// mapping, then the board-wide type default. Issues from projects that
    /// are not configured never resolve.
    #[must_use]
    pub fn resolve_column(&self, issue: &Issue) -> Option<usize> {
        let rules = self.projects.get(&issue.project)?;
        let name = rules
            .status_columns
            .get(&issue.status)
            .or_else(|| rules.type_columns.get(&issue.issue_type))
            .or_else(|| self.type_columns.get(&issue.issue_type))?;
        self.column_index(name)
    }

    /// Whether the column at `index` is a backlog column.
    #[must_use]
    pub fn is_backlog(&self, index: usize) -> bool {
        self.columns.get(index).is_some_and(|c| c.backlog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
code = "TST"
id = 7
name = "Test board"
owner = "kabir"
rank_field = 10000
priorities = ["highest", "high", "low"]
issue_types = ["task", "bug"]

[[columns]]
name = "Backlog"
backlog = true

[[columns]]
name = "In Progress"

[[columns]]
name = "Done"

[type_columns]
task = "Backlog"

[projects.TST.status_columns]
"in progress" = "In Progress"
done = "Done"

[projects.OPS.type_columns]
bug = "In Progress"
"#;

    fn sample() -> BoardConfiguration {
        BoardConfiguration::from_toml_str(SAMPLE).expect("sample parses")
    }

    #[test]
    fn sample_parses_and_validates() {
        let config = sample();
        assert_eq!(config.code, "TST");
        assert_eq!(config.owner.key(), "kabir");
        assert_eq!(config.columns.len(), 3);
        assert!(config.columns[0].backlog);
        config.validate().expect("sample is valid");
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let err = BoardConfiguration::from_toml_str("code = ").unwrap_err();
        assert!(matches!(err, BoardError::ConfigParse(_)));
    }

    #[test]
    fn status_mapping_wins_over_type_mapping() {
        let config = sample();
        let issue = Issue::new("TST-1", "TST", "task", "done");
        assert_eq!(config.resolve_column(&issue), Some(2));

        let issue = Issue::new("TST-2", "TST", "task", "open");
        assert_eq!(config.resolve_column(&issue), Some(0));
    }

    #[test]
    fn project_type_mapping_wins_over_board_default() {
        let config = sample();
        let issue = Issue::new("OPS-1", "OPS", "bug", "open");
        assert_eq!(config.resolve_column(&issue), Some(1));
    }

    #[test]
    fn unconfigured_project_does_not_resolve() {
        let config = sample();
        let issue = Issue::new("XYZ-1", "XYZ", "task", "open");
        assert_eq!(config.resolve_column(&issue), None);
    }

    #[test]
    fn unmapped_type_does_not_resolve() {
        let config = sample();
        let issue = Issue::new("OPS-2", "OPS", "epic", "open");
        assert_eq!(config.resolve_column(&issue), None);
    }

    #[test]
    fn duplicate_and_unknown_columns_are_reported_together() {
        let mut config = sample();
        config.columns.push(Column::new("Done"));
        config
            .type_columns
            .insert("bug".to_string(), "Nowhere".to_string());

        let err = config.validate().unwrap_err();
        let BoardError::Configuration { board, reason } = err else {
            panic!("expected configuration error");
        };
        assert_eq!(board, "TST");
        assert!(reason.contains("duplicate column 'Done'"), "{reason}");
        assert!(reason.contains("unknown column 'Nowhere'"), "{reason}");
    }

    #[test]
    fn empty_columns_are_rejected() {
        let mut config = sample();
        config.columns.clear();
        config.type_columns.clear();
        config.projects.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn backlog_must_be_a_prefix() {
        let mut config = sample();
        config.columns.push(Column::backlog("Icebox"));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("backlog columns must come before"));
    }

    #[test]
    fn unknown_issue_type_in_mapping_is_rejected() {
        let mut config = sample();
        config
            .type_columns
            .insert("epic".to_string(), "Backlog".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unknown issue type 'epic'"));
    }

    #[test]
    fn missing_rank_field_is_rejected() {
        let mut config = sample();
        config.rank_field = 0;
        assert!(config.validate().is_err());
    }
}
