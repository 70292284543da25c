//! YAML fallback prompt source.
//!
//! Loads prompt seed files from a directory of YAML documents and feeds them
//! into a [`PromptRegistry`](super::PromptRegistry). Used at startup so a
//! deployment works before any prompt has been saved through the API; saved
//! versions then take over through the normal Current/Replaced flow.
//!
//! File format (one or more files, any name ending in `.yaml`/`.yml`):
//!
//! ```yaml
//! prompts:
//!   - method: summarize
//!     language: en
//!     message: "Summarize: {{text}}"
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{Prompt, PromptRegistry};

/// Env var overriding the prompt seed directory.
pub const PROMPTS_DIR_ENV: &str = "DRIFTKIT_PROMPTS_DIR";

/// Default directory name when the env var is not set.
const DEFAULT_PROMPTS_DIR: &str = "prompts";

/// Error loading prompt seed files (missing dir, unreadable file, bad YAML).
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("prompts directory not found or not readable: {0}")]
    DirNotFound(String),
    #[error("failed to read prompts file {path}: {message}")]
    ReadFile { path: String, message: String },
    #[error("failed to parse YAML in {path}: {message}")]
    ParseYaml { path: String, message: String },
}

#[derive(Debug, Deserialize)]
struct PromptsFile {
    #[serde(default)]
    prompts: Vec<PromptSeed>,
}

#[derive(Debug, Deserialize)]
struct PromptSeed {
    method: String,
    #[serde(default = "default_language")]
    language: String,
    message: String,
}

fn default_language() -> String {
    "en".to_string()
}

/// The directory to load from: `dir` if `Some`, else `DRIFTKIT_PROMPTS_DIR`,
/// else `./prompts`.
fn prompts_dir(dir: Option<&Path>) -> PathBuf {
    dir.map(PathBuf::from).unwrap_or_else(|| {
        std::env::var(PROMPTS_DIR_ENV)
            .ok()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PROMPTS_DIR))
    })
}

/// Loads every `.yaml`/`.yml` file under the directory into prompt seeds.
/// Files are read in name order so seeding is deterministic.
pub fn load(dir: Option<&Path>) -> Result<Vec<Prompt>, LoadError> {
    let base = prompts_dir(dir);
    if !base.is_dir() {
        return Err(LoadError::DirNotFound(base.display().to_string()));
    }
    let mut paths: Vec<PathBuf> = std::fs::read_dir(&base)
        .map_err(|e| LoadError::DirNotFound(format!("{}: {e}", base.display())))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == "yaml" || e == "yml")
        })
        .collect();
    paths.sort();

    let mut prompts = Vec::new();
    for path in paths {
        let content = std::fs::read_to_string(&path).map_err(|e| LoadError::ReadFile {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let file: PromptsFile =
            serde_yaml::from_str(&content).map_err(|e| LoadError::ParseYaml {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        for seed in file.prompts {
            prompts.push(Prompt::new(seed.method, seed.language, seed.message));
        }
    }
    Ok(prompts)
}

/// Loads seed files and saves each into the registry. Already-saved identical
/// messages are idempotent, so re-seeding at every startup is safe. Returns
/// the number of prompts seeded.
pub fn seed_registry(
    registry: &dyn PromptRegistry,
    dir: Option<&Path>,
) -> Result<usize, LoadError> {
    let prompts = load(dir)?;
    let count = prompts.len();
    for prompt in prompts {
        registry.save(prompt);
    }
    Ok(count)
}
