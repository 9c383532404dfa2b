//! `kv show`: build a board from issue dumps and print the resulting view.

use crate::cmd::{BoardArgs, ViewArgs};
use crate::output::{OutputMode, emit, fail, heading};
use clap::Args;
use kanview_core::{BoardView, EngineConfig};
use std::io::{self, Write};

#[derive(Args, Debug)]
pub struct ShowArgs {
    #[command(flatten)]
    pub board: BoardArgs,

    #[command(flatten)]
    pub view: ViewArgs,
}

pub fn run_show(args: &ShowArgs, config: &EngineConfig, output: OutputMode) -> anyhow::Result<()> {
    let replayed = args.board.replay(config, output, |_, _, _| Ok(()))?;
    let view = replayed
        .engine
        .get_board(&replayed.code, &replayed.user, &args.view.query())
        .map_err(|err| fail(output, &err))?;

    emit(output, &view, render_text, render_pretty)
}

/// One row per issue: column, index, key, assignee, summary.
fn render_text(view: &BoardView, w: &mut dyn Write) -> io::Result<()> {
    for column in &view.columns {
        for (index, key) in column.keys.iter().enumerate() {
            let Some(placed) = view.issues.get(key) else {
                continue;
            };
            writeln!(
                w,
                "{}\t{index}\t{key}\t{}\t{}",
                column.name,
                placed.issue.assignee.as_deref().unwrap_or("-"),
                placed.issue.summary
            )?;
        }
    }
    Ok(())
}

fn render_pretty(view: &BoardView, w: &mut dyn Write) -> io::Result<()> {
    heading(w, &format!("Board {} (version {})", view.code, view.version))?;
    for column in &view.columns {
        let marker = if column.backlog { " [backlog]" } else { "" };
        writeln!(w, "{}{marker} ({})", column.name, column.keys.len())?;
        for key in &column.keys {
            let Some(placed) = view.issues.get(key) else {
                continue;
            };
            let assignee = placed
                .issue
                .assignee
                .as_deref()
                .map(|a| format!(" @{a}"))
                .unwrap_or_default();
            writeln!(w, "  {key:<12} {}{assignee}", placed.issue.summary)?;
        }
        writeln!(w)?;
    }
    Ok(())
}
