//! `kv changes`: replay issue dumps and print what changed since a version.

use crate::cmd::{BoardArgs, ViewArgs};
use crate::output::{OutputMode, emit, fail, field, heading};
use clap::Args;
use kanview_core::{BoardView, ChangeRecord, EngineConfig, IssueField};
use serde::Serialize;
use std::io::{self, Write};

#[derive(Args, Debug)]
pub struct ChangesArgs {
    #[command(flatten)]
    pub board: BoardArgs,

    #[command(flatten)]
    pub view: ViewArgs,

    /// Version the client last saw.
    #[arg(long, default_value_t = 1)]
    pub from: u64,

    /// Apply the changes to the view at `--from` and check the result
    /// matches the current view.
    #[arg(long)]
    pub verify: bool,
}

#[derive(Debug, Serialize)]
struct ChangesReport {
    #[serde(flatten)]
    changes: ChangeRecord,
    /// Column names, so placements can be read without the board definition.
    columns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    verified: Option<bool>,
}

pub fn run_changes(
    args: &ChangesArgs,
    config: &EngineConfig,
    output: OutputMode,
) -> anyhow::Result<()> {
    let query = args.view.query();
    let mut base: Option<BoardView> = None;

    let replayed = args.board.replay(config, output, |engine, user, version| {
        if args.verify && version == args.from {
            let view = engine
                .get_board(&args.board.board, user, &query)
                .map_err(|err| fail(output, &err))?;
            base = Some(view);
        }
        Ok(())
    })?;

    let changes = replayed
        .engine
        .get_changes(&replayed.code, &replayed.user, args.from, &query)
        .map_err(|err| fail(output, &err))?;
    let current = replayed
        .engine
        .get_board(&replayed.code, &replayed.user, &query)
        .map_err(|err| fail(output, &err))?;

    let verified = if args.verify {
        let Some(mut view) = base else {
            anyhow::bail!("version {} was never built; nothing to verify against", args.from);
        };
        view.apply(&changes)
            .map_err(|err| fail(output, &err))?;
        let matches = view == current;
        if !matches {
            tracing::warn!(board = %replayed.code, from = args.from, "applied changes diverge from current view");
        }
        Some(matches)
    } else {
        None
    };

    let report = ChangesReport {
        changes,
        columns: current.columns.iter().map(|c| c.name.clone()).collect(),
        verified,
    };
    emit(output, &report, render_text, render_pretty)?;

    if verified == Some(false) {
        anyhow::bail!("applied changes do not reproduce the current board");
    }
    Ok(())
}

fn fields(fields: &std::collections::BTreeSet<IssueField>) -> String {
    fields
        .iter()
        .map(|f| {
            serde_json::to_value(f)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default()
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn column_name(report: &ChangesReport, column: usize) -> &str {
    report.columns.get(column).map_or("?", String::as_str)
}

/// `+`, `-` and `~` rows: sign, key, then column and index for placed keys.
fn render_text(report: &ChangesReport, w: &mut dyn Write) -> io::Result<()> {
    let changes = &report.changes;
    writeln!(w, "version\t{}\t{}", changes.from_version, changes.to_version)?;
    for added in &changes.added {
        writeln!(
            w,
            "+\t{}\t{}\t{}",
            added.key,
            column_name(report, added.placement.column),
            added.placement.index
        )?;
    }
    for removed in &changes.removed {
        writeln!(w, "-\t{}", removed.key)?;
    }
    for updated in &changes.updated {
        writeln!(
            w,
            "~\t{}\t{}\t{}\t{}",
            updated.key,
            column_name(report, updated.placement.column),
            updated.placement.index,
            fields(&updated.fields)
        )?;
    }
    if let Some(verified) = report.verified {
        writeln!(w, "verified\t{verified}")?;
    }
    Ok(())
}

fn render_pretty(report: &ChangesReport, w: &mut dyn Write) -> io::Result<()> {
    let changes = &report.changes;
    heading(
        w,
        &format!(
            "Board {}: version {} -> {}",
            changes.board, changes.from_version, changes.to_version
        ),
    )?;
    if changes.is_empty() {
        writeln!(w, "no changes")?;
    }
    for added in &changes.added {
        writeln!(
            w,
            "  + {:<12} {} #{}",
            added.key,
            column_name(report, added.placement.column),
            added.placement.index
        )?;
    }
    for removed in &changes.removed {
        writeln!(w, "  - {}", removed.key)?;
    }
    for updated in &changes.updated {
        writeln!(
            w,
            "  ~ {:<12} {} #{} ({})",
            updated.key,
            column_name(report, updated.placement.column),
            updated.placement.index,
            fields(&updated.fields)
        )?;
    }
    if let Some(verified) = report.verified {
        writeln!(w)?;
        field(w, "verified", if verified { "yes" } else { "NO" })?;
    }
    Ok(())
}
