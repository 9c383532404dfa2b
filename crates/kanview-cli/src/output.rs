//! How `kv` writes results and failures.
//!
//! Every command renders one serializable value in one of three modes. The
//! mode comes from `--format`, then `--json`, then the `FORMAT` environment
//! variable, and finally from whether stdout is a terminal.

use clap::ValueEnum;
use kanview_core::BoardError;
use serde::Serialize;
use std::io::{self, IsTerminal, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    /// Headings and aligned columns for people.
    Pretty,
    /// Tab-separated rows for scripts.
    Text,
    /// JSON on stdout, JSON errors on stderr.
    Json,
}

impl OutputMode {
    pub const fn is_json(self) -> bool {
        matches!(self, Self::Json)
    }

    /// Mode for this process: flags first, then `FORMAT`, then the terminal.
    pub fn resolve(flag: Option<Self>, json: bool) -> Self {
        let env = std::env::var("FORMAT").ok();
        Self::choose(flag, json, env.as_deref(), io::stdout().is_terminal())
    }

    fn choose(flag: Option<Self>, json: bool, env: Option<&str>, terminal: bool) -> Self {
        flag.or_else(|| json.then_some(Self::Json))
            .or_else(|| env.and_then(|raw| Self::from_str(raw.trim(), true).ok()))
            .unwrap_or(if terminal { Self::Pretty } else { Self::Text })
    }
}

/// Write `value` to stdout: serialized in JSON mode, otherwise through
/// the renderer for the mode.
pub fn emit<T: Serialize>(
    mode: OutputMode,
    value: &T,
    text: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
    pretty: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    let mut out = io::stdout().lock();
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut out, value)?;
            writeln!(out)?;
        }
        OutputMode::Text => text(value, &mut out)?,
        OutputMode::Pretty => pretty(value, &mut out)?,
    }
    Ok(())
}

/// A title underlined to its own width.
pub fn heading(w: &mut dyn Write, title: &str) -> io::Result<()> {
    writeln!(w, "{title}")?;
    writeln!(w, "{}", "=".repeat(title.chars().count()))
}

pub fn field(w: &mut dyn Write, label: &str, value: &str) -> io::Result<()> {
    writeln!(w, "{label:>10}  {value}")
}

pub fn divider(w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{}", "-".repeat(40))
}

/// An engine failure as written to stderr.
#[derive(Debug, Serialize)]
pub struct FailureReport {
    pub error_code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<&'static str>,
}

impl From<&BoardError> for FailureReport {
    fn from(err: &BoardError) -> Self {
        Self {
            error_code: err.code().code(),
            message: err.to_string(),
            hint: err.hint(),
        }
    }
}

impl FailureReport {
    fn write(&self, mode: OutputMode, w: &mut dyn Write) -> anyhow::Result<()> {
        if mode.is_json() {
            serde_json::to_writer_pretty(&mut *w, &serde_json::json!({ "error": self }))?;
            writeln!(w)?;
        } else {
            writeln!(w, "error[{}]: {}", self.error_code, self.message)?;
            if let Some(hint) = self.hint {
                writeln!(w, "  hint: {hint}")?;
            }
        }
        Ok(())
    }
}

/// Describe `err` on stderr and hand it back as the command's error.
pub fn fail(mode: OutputMode, err: &BoardError) -> anyhow::Error {
    if let Err(write) = FailureReport::from(err).write(mode, &mut io::stderr().lock()) {
        tracing::warn!(error = %write, "could not write failure report");
    }
    anyhow::anyhow!("{err}")
}
