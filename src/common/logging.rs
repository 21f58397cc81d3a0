//! Logging and tracing configuration
//!
//! The CLI prints compact logs to stderr so they don't interleave with the
//! interactive prompt on stdout, and keeps a full log file per run.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

use super::paths;

/// Name of the log file inside the log directory
const LOG_FILE: &str = "session.log";

/// Handle returned by [`init_cli`]; keep it alive for the lifetime of the
/// process so buffered file logs get flushed
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
    /// Where the file log is being written, if file logging is active
    pub log_file: Option<PathBuf>,
}

/// Initialize tracing for the CLI
///
/// Logs are controlled by the `RUST_LOG` environment variable.
/// Default level is INFO for this crate, WARN for dependencies. The log file
/// always records DAP traffic at DEBUG.
pub fn init_cli() -> LogGuard {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("cell_debugger=info,warn"));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .with_filter(filter);

    let log_dir = match paths::ensure_log_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("Warning: Could not create log directory: {}", e);
            None
        }
    };

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::never(&dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_filter(EnvFilter::new("cell_debugger=debug,info"));

            tracing_subscriber::registry()
                .with(stderr_layer)
                .with(file_layer)
                .init();

            LogGuard {
                _file_guard: Some(guard),
                log_file: Some(dir.join(LOG_FILE)),
            }
        }
        None => {
            tracing_subscriber::registry().with(stderr_layer).init();
            LogGuard {
                _file_guard: None,
                log_file: None,
            }
        }
    }
}

/// Get the path to the session log file
pub fn session_log_path() -> Option<PathBuf> {
    paths::log_dir().map(|d| d.join(LOG_FILE))
}
