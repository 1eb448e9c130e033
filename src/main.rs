use beads_core::config::{self, CliOverrides, Config};
use beads_core::daemon::Daemon;
use beads_core::logging::init_logging;
use beads_core::BeadsError;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Workspace daemon for the beads issue store.
///
/// Serves the store over `<workspace>/.beads/bd.sock` until asked to
/// shut down. CLI front-ends and agents talk to it over the socket.
#[derive(Parser, Debug)]
#[command(name = "bd-daemon", version, about)]
struct Cli {
    /// Workspace root; discovered by walking up from the current
    /// directory when omitted.
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Log to stderr instead of .beads/daemon.log.
    #[arg(long)]
    foreground: bool,

    /// Debug-level logging.
    #[arg(short, long)]
    verbose: bool,

    /// Override the flush debounce, in milliseconds.
    #[arg(long)]
    flush_debounce_ms: Option<u64>,

    /// Disable the debounced JSONL export.
    #[arg(long)]
    no_auto_flush: bool,

    /// Disable the startup JSONL import.
    #[arg(long)]
    no_auto_import: bool,

    /// Override the store location.
    #[arg(long)]
    db: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(&cli) {
        eprintln!("bd-daemon: {e}");
        std::process::exit(e.exit_code());
    }
}

fn run(cli: &Cli) -> Result<(), BeadsError> {
    let workspace = match &cli.workspace {
        Some(path) => path.clone(),
        None => config::discover_workspace(&std::env::current_dir()?)?,
    };

    let overrides = CliOverrides {
        db: cli.db.clone(),
        no_auto_flush: cli.no_auto_flush.then_some(true),
        no_auto_import: cli.no_auto_import.then_some(true),
        flush_debounce: cli.flush_debounce_ms.map(Duration::from_millis),
        ..CliOverrides::default()
    };
    let config = Config::resolve(&workspace, &overrides)?;

    let log_file = if cli.foreground {
        None
    } else {
        Some(config.log_file_path())
    };
    if let Err(e) = init_logging(cli.verbose, log_file.as_deref()) {
        eprintln!("bd-daemon: logging init failed: {e}");
    }

    Daemon::new(config)?.run()
}
