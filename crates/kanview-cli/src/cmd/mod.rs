pub mod changes;
pub mod check;
pub mod show;

use crate::adapters::{DirConfigurations, JsonFileIssueSource};
use crate::output::{OutputMode, fail};
use anyhow::Result;
use clap::Args;
use kanview_core::{
    AllowAll, BoardEngine, BoardFilter, BoardRegistry, EngineConfig, User, ViewQuery,
};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

/// Filter value selecting issues that have no assignee / no component.
pub const NONE_SELECTION: &str = "@none";

/// Where a board and its issue history come from.
#[derive(Args, Debug)]
pub struct BoardArgs {
    /// Board code.
    pub board: String,

    /// Directory of `*.toml` board definitions.
    #[arg(long, default_value = "boards")]
    pub boards: PathBuf,

    /// JSON issue dump; repeat to replay successive fetches.
    #[arg(long = "issues", required = true)]
    pub issues: Vec<PathBuf>,

    /// User to view the board as.
    #[arg(long, default_value = "anonymous")]
    pub user: String,
}

/// Which part of the board to show.
#[derive(Args, Debug, Default)]
pub struct ViewArgs {
    /// Hide issues in backlog columns.
    #[arg(long)]
    pub hide_backlog: bool,

    /// Only these projects (repeatable).
    #[arg(long = "project")]
    pub projects: Vec<String>,

    /// Only these priorities (repeatable).
    #[arg(long = "priority")]
    pub priorities: Vec<String>,

    /// Only these issue types (repeatable).
    #[arg(long = "type")]
    pub issue_types: Vec<String>,

    /// Only these assignees (repeatable); `@none` selects unassigned issues.
    #[arg(long = "assignee")]
    pub assignees: Vec<String>,

    /// Only these components (repeatable); `@none` selects issues without one.
    #[arg(long = "component")]
    pub components: Vec<String>,
}

impl ViewArgs {
    pub fn query(&self) -> ViewQuery {
        ViewQuery {
            backlog: !self.hide_backlog,
            filter: BoardFilter {
                projects: self.projects.iter().cloned().collect(),
                priorities: self.priorities.iter().cloned().collect(),
                issue_types: self.issue_types.iter().cloned().collect(),
                assignees: optional_selection(&self.assignees),
                components: optional_selection(&self.components),
            },
        }
    }
}

fn optional_selection(values: &[String]) -> BTreeSet<Option<String>> {
    values
        .iter()
        .map(|v| (v != NONE_SELECTION).then(|| v.clone()))
        .collect()
}

/// An engine wired to the file adapters, with every issue dump replayed.
pub struct Replayed {
    pub engine: BoardEngine,
    pub user: User,
    pub code: String,
}

impl BoardArgs {
    /// Build the board from the first dump, then rebuild once per further dump.
    ///
    /// `after_each` runs after every publish with the new version.
    pub fn replay(
        &self,
        config: &EngineConfig,
        output: OutputMode,
        mut after_each: impl FnMut(&BoardEngine, &User, u64) -> Result<()>,
    ) -> Result<Replayed> {
        let boards = DirConfigurations::load(&self.boards)?;
        let source = JsonFileIssueSource::new(self.issues.clone());
        if source.is_empty() {
            anyhow::bail!("no issue dumps given");
        }
        let dumps = source.len();
        let engine = BoardEngine::new(
            Arc::new(boards),
            Arc::new(source),
            Arc::new(AllowAll),
            Arc::new(BoardRegistry::new()),
            config.clone(),
        );

        let user = User::new(self.user.clone());
        for _ in 0..dumps {
            let version = engine
                .rebuild(&self.board)
                .map_err(|err| fail(output, &err))?;
            after_each(&engine, &user, version)?;
        }

        Ok(Replayed {
            engine,
            user,
            code: self.board.clone(),
        })
    }
}
