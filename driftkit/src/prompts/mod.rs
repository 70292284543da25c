//! Versioned prompt registry and template rendering.
//!
//! Prompts are keyed by `(method, language)`. For each pair exactly one
//! prompt is [`PromptState::Current`]; saving a new message atomically flips
//! the previous one to `Replaced`, while saving identical text is idempotent
//! (the existing record, id included, is returned unchanged). Rendering
//! substitutes `{{var}}` placeholders (case-sensitive; missing variables
//! render empty and are logged) and expands `@{groupId}` dictionary tokens.

pub mod dictionary;
pub mod file_source;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use dictionary::Dictionary;

/// Lifecycle state of one prompt version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PromptState {
    Current,
    Replaced,
}

/// One versioned prompt: templated text for a logical step, per language.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    pub id: String,
    /// The logical step this prompt belongs to (lookup key).
    pub method: String,
    pub language: String,
    /// Templated text with `{{var}}` placeholders and `@{group}` tokens.
    pub message: String,
    pub state: PromptState,
    pub created_time: DateTime<Utc>,
    pub updated_time: DateTime<Utc>,
}

impl Prompt {
    /// New Current prompt with a fresh id and now-timestamps.
    pub fn new(
        method: impl Into<String>,
        language: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            method: method.into(),
            language: language.into(),
            message: message.into(),
            state: PromptState::Current,
            created_time: now,
            updated_time: now,
        }
    }
}

/// Error from prompt lookup or the backing store.
#[derive(Debug, Clone, Error)]
pub enum PromptError {
    /// No current prompt and no fallback file entry for the pair.
    #[error("no prompt for method `{method}` language `{language}`")]
    Missing { method: String, language: String },
    /// Backing store failure.
    #[error("prompt store: {0}")]
    Store(String),
}

/// Versioned prompt store keyed by `(method, language)`.
pub trait PromptRegistry: Send + Sync {
    /// The Current prompt for the pair, if any.
    fn current(&self, method: &str, language: &str) -> Option<Prompt>;

    /// Saves a prompt version. Identical message text is idempotent (the
    /// stored record is returned, id unchanged, state Current); otherwise the
    /// previous Current atomically becomes Replaced and the new version is
    /// stored as Current.
    fn save(&self, prompt: Prompt) -> Prompt;

    /// All versions for the pair, oldest first.
    fn history(&self, method: &str, language: &str) -> Vec<Prompt>;
}

/// In-memory prompt registry. Versions for one `(method, language)` pair live
/// in a single map entry, so the Current/Replaced flip happens under one
/// shard lock.
#[derive(Default)]
pub struct InMemoryPromptRegistry {
    entries: DashMap<(String, String), Vec<Prompt>>,
}

impl InMemoryPromptRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PromptRegistry for InMemoryPromptRegistry {
    fn current(&self, method: &str, language: &str) -> Option<Prompt> {
        self.entries
            .get(&(method.to_string(), language.to_string()))
            .and_then(|versions| {
                versions
                    .iter()
                    .find(|p| p.state == PromptState::Current)
                    .cloned()
            })
    }

    fn save(&self, mut prompt: Prompt) -> Prompt {
        let key = (prompt.method.clone(), prompt.language.clone());
        let mut versions = self.entries.entry(key).or_default();
        if let Some(existing) = versions
            .iter()
            .find(|p| p.state == PromptState::Current)
        {
            if existing.message == prompt.message {
                return existing.clone();
            }
        }
        let now = Utc::now();
        for p in versions.iter_mut() {
            if p.state == PromptState::Current {
                p.state = PromptState::Replaced;
                p.updated_time = now;
            }
        }
        if prompt.id.is_empty() {
            prompt.id = uuid::Uuid::new_v4().to_string();
        }
        prompt.state = PromptState::Current;
        prompt.updated_time = now;
        versions.push(prompt.clone());
        prompt
    }

    fn history(&self, method: &str, language: &str) -> Vec<Prompt> {
        self.entries
            .get(&(method.to_string(), language.to_string()))
            .map(|v| v.clone())
            .unwrap_or_default()
    }
}

static VAR_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([A-Za-z0-9_.]+)\}\}").expect("var token regex"));
static GROUP_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@\{([A-Za-z0-9_.-]+)\}").expect("group token regex"));

/// Renders prompts: `{{var}}` substitution plus `@{group}` dictionary
/// expansion. Construct once and share; the dictionary is optional.
#[derive(Clone, Default)]
pub struct PromptRenderer {
    dictionary: Option<Arc<dyn Dictionary>>,
}

impl PromptRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dictionary(mut self, dictionary: Arc<dyn Dictionary>) -> Self {
        self.dictionary = Some(dictionary);
        self
    }

    /// Renders the prompt's message. Variable names are case-sensitive;
    /// missing variables render as empty and are logged. `@{group}` tokens
    /// expand through the dictionary (unknown groups also render empty).
    pub fn render(&self, prompt: &Prompt, vars: &HashMap<String, String>) -> String {
        let with_vars = VAR_TOKEN.replace_all(&prompt.message, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match vars.get(name) {
                Some(v) => v.clone(),
                None => {
                    tracing::warn!(method = %prompt.method, variable = name, "prompt variable missing, rendering empty");
                    String::new()
                }
            }
        });
        GROUP_TOKEN
            .replace_all(&with_vars, |caps: &regex::Captures<'_>| {
                let group_id = &caps[1];
                let expanded = self
                    .dictionary
                    .as_ref()
                    .and_then(|d| d.group(group_id, &prompt.language))
                    .map(|g| g.entries.join(", "));
                match expanded {
                    Some(text) => text,
                    None => {
                        tracing::warn!(method = %prompt.method, group = group_id, "dictionary group missing, rendering empty");
                        String::new()
                    }
                }
            })
            .into_owned()
    }
}
