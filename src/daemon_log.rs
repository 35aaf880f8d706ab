//! Shared debug logging utility for daemon components.

use std::io::Write;
use std::path::PathBuf;
use std::sync::OnceLock;

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Direct `daemon_log` output to `path`. Only the first call takes effect.
pub fn init(path: PathBuf) {
    let _ = LOG_PATH.set(path);
}

/// Debug logging utility for daemon components.
///
/// The `tag` parameter identifies the source module (e.g., "server", "service",
/// "rpc_client") to aid debugging. Messages always go to tracing and, once
/// [`init`] has run, are appended to the daemon's `daemon-debug.log`.
pub fn daemon_log(tag: &str, msg: &str) {
    tracing::debug!(target: "session_broker::daemon", tag, "{}", msg);
    if let Some(log_path) = LOG_PATH.get() {
        if let Ok(mut file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
        {
            let now = chrono::Local::now().format("%H:%M:%S%.3f");
            let _ = writeln!(file, "[{}] [{}] {}", now, tag, msg);
        }
    }
}
