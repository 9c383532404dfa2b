//! `kv check`: parse and validate every board definition in a directory.

use crate::adapters::DirConfigurations;
use crate::output::{OutputMode, divider, emit};
use clap::Args;
use serde::Serialize;
use std::io::{self, Write};
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Directory of `*.toml` board definitions.
    #[arg(long, default_value = "boards")]
    pub boards: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct CheckedBoard {
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

pub fn run_check(args: &CheckArgs, output: OutputMode) -> anyhow::Result<()> {
    let boards = DirConfigurations::load(&args.boards)?;
    let checked: Vec<CheckedBoard> = boards
        .files()
        .iter()
        .map(|file| {
            let name = file
                .path
                .file_name()
                .map_or_else(|| file.path.display().to_string(), |n| n.to_string_lossy().into_owned());
            let code = file.parsed.as_ref().ok().map(|c| c.code.clone());
            match file.check() {
                Ok(_) => CheckedBoard {
                    file: name,
                    code,
                    ok: true,
                    error_code: None,
                    message: None,
                    hint: None,
                },
                Err(err) => CheckedBoard {
                    file: name,
                    code,
                    ok: false,
                    error_code: Some(err.code().code().to_string()),
                    message: Some(err.to_string()),
                    hint: err.hint().map(str::to_string),
                },
            }
        })
        .collect();

    emit(output, &checked, render_text, render_pretty)?;

    let failed = checked.iter().filter(|c| !c.ok).count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} board definitions are invalid", checked.len());
    }
    Ok(())
}

fn render_text(checked: &Vec<CheckedBoard>, w: &mut dyn Write) -> io::Result<()> {
    for board in checked {
        writeln!(
            w,
            "{}\t{}\t{}\t{}",
            board.file,
            board.code.as_deref().unwrap_or("-"),
            if board.ok { "ok" } else { "invalid" },
            board.error_code.as_deref().unwrap_or("-")
        )?;
    }
    Ok(())
}

fn render_pretty(checked: &Vec<CheckedBoard>, w: &mut dyn Write) -> io::Result<()> {
    for board in checked {
        let code = board.code.as_deref().unwrap_or("?");
        if board.ok {
            writeln!(w, "ok       {code:<10} {}", board.file)?;
        } else {
            writeln!(w, "invalid  {code:<10} {}", board.file)?;
            if let Some(message) = &board.message {
                writeln!(w, "         {message}")?;
            }
            if let Some(hint) = &board.hint {
                writeln!(w, "         hint: {hint}")?;
            }
        }
    }
    divider(w)?;
    let valid = checked.iter().filter(|c| c.ok).count();
    writeln!(w, "{valid}/{} board definitions valid", checked.len())
}
