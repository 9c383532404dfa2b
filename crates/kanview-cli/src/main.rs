#![forbid(unsafe_code)]

mod adapters;
mod cmd;
mod output;

use clap::{Parser, Subcommand};
use kanview_core::load_engine_config;
use output::OutputMode;
use std::env;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "kv: kanban board state engine",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Shorthand for `--format json`.
    #[arg(long, global = true)]
    json: bool,

    /// Engine settings file (retention, rebuild wait).
    #[arg(long, global = true, default_value = "kanview.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn output_mode(&self) -> OutputMode {
        OutputMode::resolve(self.format, self.json)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Build a board and print it",
        long_about = "Build a board from one or more JSON issue dumps and print the view.",
        after_help = "EXAMPLES:\n    # Show a board\n    kv show KV --boards boards --issues issues.json\n\n    # Only high priority work outside the backlog\n    kv show KV --issues issues.json --hide-backlog --priority high\n\n    # Emit machine-readable output\n    kv show KV --issues issues.json --json"
    )]
    Show(cmd::show::ShowArgs),

    #[command(
        about = "Print changes between board versions",
        long_about = "Replay successive JSON issue dumps, one version each, and print the changes since --from.",
        after_help = "EXAMPLES:\n    # What changed between the first and last dump\n    kv changes KV --issues day1.json --issues day2.json\n\n    # Check that applying the changes reproduces the board\n    kv changes KV --issues day1.json --issues day2.json --verify"
    )]
    Changes(cmd::changes::ChangesArgs),

    #[command(
        about = "Validate board definitions",
        long_about = "Parse and validate every *.toml board definition in a directory.",
        after_help = "EXAMPLES:\n    # Check the default boards/ directory\n    kv check\n\n    # Emit machine-readable output\n    kv check --boards conf/boards --json"
    )]
    Check(cmd::check::CheckArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("KANVIEW_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "kanview=debug,info"
        } else {
            "kanview=info,warn"
        })
    });

    let format = env::var("KANVIEW_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let output = cli.output_mode();
    if cli.verbose {
        info!(json = output.is_json(), "Verbose mode enabled");
    }

    let engine_config = load_engine_config(&cli.config)?;

    match cli.command {
        Commands::Show(ref args) => cmd::show::run_show(args, &engine_config, output),
        Commands::Changes(ref args) => cmd::changes::run_changes(args, &engine_config, output),
        Commands::Check(ref args) => cmd::check::run_check(args, output),
    }
}
