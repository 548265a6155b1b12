//! Tracing setup: human-readable stdout plus an append-only run log file.
//!
//! The log file is what the scheduler archives after each run, so it gets
//! every fetch, parse and write outcome at `debug` regardless of `RUST_LOG`.

use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::utils::parent_dir;

/// Install the global subscriber. Keep the returned guard alive until exit
/// or buffered file lines are lost.
pub fn configure_logging(log_file: &Path) -> WorkerGuard {
    let stdout_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_log = fmt::layer()
        .with_writer(io::stdout)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_filter(stdout_filter);

    let file_name = log_file
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "newsroom_ingest.log".into());
    let file_appender = rolling::never(parent_dir(log_file), file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let file_log = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_filter(EnvFilter::new("info,newsroom_ingest=debug,html5ever=warn,selectors=warn"));

    tracing_subscriber::registry()
        .with(stdout_log)
        .with(file_log)
        .init();

    guard
}
