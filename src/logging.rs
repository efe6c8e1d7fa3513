//! Log sink setup
//!
//! Maps the `log` configuration section onto a `tracing` subscriber. The
//! `file` driver uses a non-blocking appender; the returned guard must be
//! held for the lifetime of the process so buffered lines are flushed on
//! exit.

use crate::config::{LogConfig, LogDriver};
use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

/// Initialize the global tracing subscriber from configuration
///
/// Returns a writer guard when logging to a file, `None` for stdout.
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = config.level.to_filter();

    match config.driver {
        LogDriver::Stdout => {
            tracing_subscriber::fmt()
                .with_max_level(filter)
                .with_target(false)
                .init();
            Ok(None)
        }
        LogDriver::File => {
            let path = Path::new(&config.path);
            let dir = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            };
            let file_name = path
                .file_name()
                .with_context(|| format!("log path has no file name: {}", config.path))?;

            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory: {:?}", dir))?;

            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);

            tracing_subscriber::fmt()
                .with_max_level(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Ok(Some(guard))
        }
    }
}
