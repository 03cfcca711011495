//! Structured logging for debugging loom.
//!
//! Log levels:
//! - ERROR: Critical failures that prevent operations from completing
//! - WARN: Unexpected conditions that are recoverable (partial failures, orphans)
//! - INFO: High-level lifecycle notifications (start, stop, resume)
//! - DEBUG: Detailed operation traces (spawns, attaches, store commits)
//! - TRACE: Very detailed traces (tmux output, polling)
//!
//! Debug mode can be enabled with `--debug` flag or `LOOM_DEBUG=1` env var.
//! `RUST_LOG` takes precedence over both when set.

use std::fs;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILE: &str = "loom.log";

/// Whether `LOOM_DEBUG` asks for debug output.
pub fn env_debug() -> bool {
    std::env::var("LOOM_DEBUG")
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Default filter directive for the given debug setting.
pub fn default_directive(debug: bool) -> &'static str {
    if debug {
        "loom=debug"
    } else {
        "loom=info"
    }
}

/// Path of the log file inside a loom directory.
pub fn log_path(loom_dir: &Path) -> PathBuf {
    loom_dir.join(LOG_FILE)
}

/// Initialize logging to `~/.loom/loom.log`.
///
/// The returned guard flushes the background writer when dropped and must be
/// held for the lifetime of the process. Returns `None` when no home
/// directory is available; logging is then disabled.
pub fn init(debug: bool) -> Option<WorkerGuard> {
    let loom_dir = dirs::home_dir()?.join(".loom");
    init_in(&loom_dir, debug)
}

/// Initialize logging into an explicit directory.
pub fn init_in(loom_dir: &Path, debug: bool) -> Option<WorkerGuard> {
    let debug_enabled = debug || env_debug();

    fs::create_dir_all(loom_dir).ok()?;
    let path = log_path(loom_dir);
    // Truncate file on startup
    let file = fs::File::create(&path).ok()?;
    let (writer, guard) = tracing_appender::non_blocking(file);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug_enabled)));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(path = %path.display(), debug = debug_enabled, "Logging initialized");
        Some(guard)
    } else {
        None
    }
}
