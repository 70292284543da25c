//! Shared tracing setup for host processes (feature `tracing-init`).
//!
//! Installs an `EnvFilter`-driven subscriber writing to a daily-rotated file
//! under the app's state directory, falling back to stderr when the directory
//! cannot be created. Returns the appender guard; hosts must keep it alive for
//! the process lifetime or buffered log lines are lost.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Directory for log files: `$XDG_STATE_HOME/<app>/logs` or the platform
/// equivalent from `dirs`.
pub fn log_dir(app_name: &str) -> Option<PathBuf> {
    let base = match std::env::var_os("XDG_STATE_HOME") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::state_dir().or_else(dirs::data_local_dir)?,
    };
    Some(base.join(app_name).join("logs"))
}

/// Initializes tracing with a daily-rotated file appender for `app_name`.
///
/// The filter comes from `RUST_LOG` (default `info`). Returns the worker guard
/// on success; `None` when a subscriber was already installed (the call is
/// then a no-op, which keeps tests and embedded use safe).
pub fn init_file_tracing(app_name: &str) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let dir = log_dir(app_name)?;
    if std::fs::create_dir_all(&dir).is_err() {
        return None;
    }
    let appender = tracing_appender::rolling::daily(dir, format!("{app_name}.log"));
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false))
        .try_init()
        .is_ok();

    installed.then_some(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_env;

    #[test]
    fn log_dir_is_under_app_name() {
        let _env = test_env::lock();
        let state = std::path::Path::new("/tmp/driftkit-test-state");
        let dir = test_env::with_var("XDG_STATE_HOME", state, || log_dir("driftkit"))
            .expect("dir");
        assert!(dir.ends_with("driftkit/logs"));
    }
}
