//! Logging infrastructure for Lookout.
//!
//! Structured logging using the `tracing` ecosystem. The orchestrator keeps
//! its own log separate from the worker logs so a wedged worker can be
//! diagnosed from either side.
//!
//! ## Features
//!
//! - JSON lines format for machine parsing
//! - File output to `~/.lookout/logs/lookout.log`
//! - Console output with configurable verbosity
//!
//! ## Example
//!
//! ```no_run
//! use lookout_core::logging;
//!
//! let _guard = logging::init_logging(None, false).expect("logging init");
//!
//! tracing::info!("lookout started");
//! tracing::debug!(worker = "crowd-count", "probing health");
//! ```

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::error::{LookoutError, Result};

/// Guard that must be held to ensure log flushing on shutdown.
///
/// Keep this guard alive for the lifetime of the application.
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize the Lookout logging system.
///
/// This sets up:
/// - File logging to `<log_dir>/lookout.log` (JSON lines, daily rotation)
/// - Console logging to stderr (human-readable format)
///
/// `log_dir` defaults to `~/.lookout/logs/`. `verbose` lowers the default
/// level to DEBUG; `RUST_LOG` overrides both.
pub fn init_logging(log_dir: Option<PathBuf>, verbose: bool) -> Result<LogGuard> {
    let log_dir = match log_dir {
        Some(dir) => dir,
        None => default_log_dir()?,
    };

    std::fs::create_dir_all(&log_dir).map_err(|e| LookoutError::DirectoryCreation {
        path: log_dir.clone(),
        source: e,
    })?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "lookout.log");
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("lookout={default_level}")));

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .json()
        .with_span_events(FmtSpan::CLOSE)
        .with_current_span(true)
        .with_span_list(true);

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(verbose)
        .with_line_number(verbose)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    tracing::debug!(log_dir = %log_dir.display(), verbose, "logging initialized");

    Ok(LogGuard {
        _file_guard: Some(file_guard),
    })
}

/// Initialize minimal console-only logging for testing.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

/// Root of Lookout's per-user state: `~/.lookout/`.
pub fn lookout_home() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".lookout"))
        .ok_or_else(|| LookoutError::internal("home directory could not be determined"))
}

/// Get the default log directory path (`~/.lookout/logs/`).
pub fn default_log_dir() -> Result<PathBuf> {
    Ok(lookout_home()?.join("logs"))
}

/// Convenience macro for logging worker lifecycle events.
///
/// # Example
///
/// ```ignore
/// log_worker_event!("crowd-count", "spawned");
/// log_worker_event!("crowd-count", "force_stopped", pid = 4242);
/// ```
#[macro_export]
macro_rules! log_worker_event {
    ($worker:expr, $event:expr) => {
        tracing::info!(
            target: "lookout::worker",
            worker = %$worker,
            event = $event,
            "worker event"
        )
    };
    ($worker:expr, $event:expr, $($field:tt)*) => {
        tracing::info!(
            target: "lookout::worker",
            worker = %$worker,
            event = $event,
            $($field)*,
            "worker event"
        )
    };
}
