//! Fill the process environment from DriftKit's config files.
//!
//! DriftKit components read their settings from environment variables; this
//! crate is the single place that fills those variables from files. Hosts
//! call [`load_and_apply`] once at startup, before constructing the runtime.
//!
//! Two file sources feed one merged view, lowest priority first:
//!
//! 1. `$XDG_CONFIG_HOME/<app_name>/config.toml`, `[env]` table
//! 2. project `.env` (current directory, or `override_dir` when given)
//!
//! A key that is already set in the process environment is never touched, so
//! the effective priority is **existing env > `.env` > XDG**. The returned
//! [`Applied`] summary says exactly which keys were set and from which
//! source, so hosts can log their effective configuration.

mod dotenv;
mod xdg_toml;

#[cfg(feature = "tracing-init")]
pub mod tracing_init;

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;

/// Error loading configuration files.
#[derive(Error, Debug)]
pub enum LoadError {
    /// The platform config directory could not be resolved.
    #[error("resolve config dir: {0}")]
    ConfigDir(String),
    /// A config file exists but could not be read.
    #[error("read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    /// A config file exists but could not be parsed.
    #[error("parse {path}: {message}")]
    Parse { path: String, message: String },
}

/// File source an applied value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    DotEnv,
    Xdg,
}

/// Outcome of [`load_and_apply`]: the keys that were written into the
/// process environment, sorted, each with its winning source. Keys already
/// present in the environment are never listed.
#[derive(Debug, Default)]
pub struct Applied {
    pub entries: Vec<(String, Source)>,
}

impl Applied {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The source that supplied `key`, when this call set it.
    pub fn source_of(&self, key: &str) -> Option<Source> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, s)| *s)
    }
}

/// Loads the XDG `[env]` table and the project `.env`, merges them (`.env`
/// wins on collision), and sets each merged key that is **not** already
/// present in the process environment.
///
/// * `app_name`: e.g. `"driftkit"` — names the XDG path
///   `~/.config/<app_name>/config.toml`.
/// * `override_dir`: when `Some`, `.env` is looked up there instead of
///   `std::env::current_dir()`.
pub fn load_and_apply(app_name: &str, override_dir: Option<&Path>) -> Result<Applied, LoadError> {
    // Lowest priority seeds the merged view; later inserts overwrite.
    let mut merged: HashMap<String, (String, Source)> = xdg_toml::load_env_map(app_name)?
        .into_iter()
        .map(|(key, value)| (key, (value, Source::Xdg)))
        .collect();
    for (key, value) in dotenv::load_env_map(override_dir)? {
        merged.insert(key, (value, Source::DotEnv));
    }

    let mut applied = Applied::default();
    for (key, (value, source)) in merged {
        if std::env::var_os(&key).is_some() {
            continue; // existing env always wins
        }
        std::env::set_var(&key, value);
        applied.entries.push((key, source));
    }
    applied.entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(applied)
}

/// Serializes tests that mutate process-wide environment variables.
#[cfg(test)]
pub(crate) mod test_env {
    use std::sync::{Mutex, MutexGuard};

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    pub(crate) fn lock() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs `f` with `var` set to `value`, restoring the previous state.
    pub(crate) fn with_var<T>(var: &str, value: &std::path::Path, f: impl FnOnce() -> T) -> T {
        let previous = std::env::var_os(var);
        std::env::set_var(var, value);
        let out = f();
        match previous {
            Some(v) => std::env::set_var(var, v),
            None => std::env::remove_var(var),
        }
        out
    }
}
