//! Logging initialization for the daemon binary.

use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// Filter precedence: `RUST_LOG` if set, else `debug` with `--verbose`,
/// else `info`. When `log_file` is given (the detached daemon), output
/// goes there instead of stderr.
///
/// # Errors
///
/// Returns an error if the log file cannot be opened.
pub fn init_logging(verbose: bool, log_file: Option<&Path>) -> anyhow::Result<()> {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if let Some(path) = log_file {
        let file = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)?;
        builder
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();
    } else {
        builder.with_writer(std::io::stderr).init();
    }

    Ok(())
}
