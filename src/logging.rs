//! Tracing setup.
//!
//! Console output goes to stderr and stays at `warn` unless `--verbose` or
//! `RUST_LOG` says otherwise. When a log directory is given, a daily rolling
//! file under it receives every event at debug level, optionally as JSON lines.

use anyhow::Result;
use std::path::Path;
pub use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, Default)]
pub struct LogOptions {
    pub verbose: bool,
    /// Write the log file as JSON lines.
    pub json: bool,
}

fn console_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("conductor=debug,info")
            } else {
                EnvFilter::try_new("warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("warn"))
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the life of the process.
pub fn init(log_dir: Option<&Path>, options: LogOptions) -> Result<Option<WorkerGuard>> {
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .with_filter(console_filter(options.verbose));

    let Some(dir) = log_dir else {
        tracing_subscriber::registry().with(console).try_init()?;
        return Ok(None);
    };

    std::fs::create_dir_all(dir)?;
    let appender = tracing_appender::rolling::daily(dir, "conductor.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file_filter = EnvFilter::new("conductor=debug,info");

    if options.json {
        let file = fmt::layer()
            .json()
            .with_writer(writer)
            .with_filter(file_filter);
        tracing_subscriber::registry()
            .with(console)
            .with(file)
            .try_init()?;
    } else {
        let file = fmt::layer()
            .with_ansi(false)
            .with_writer(writer)
            .with_filter(file_filter);
        tracing_subscriber::registry()
            .with(console)
            .with(file)
            .try_init()?;
    }

    Ok(Some(guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_filter_builds_for_both_levels() {
        console_filter(true);
        console_filter(false);
    }
}
