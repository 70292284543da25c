//! Dictionary groups for prompt expansion.
//!
//! A dictionary group is a named, language-qualified list of entries that
//! prompts reference with `@{groupId}` tokens. Groups live outside prompt
//! text so terminology can be updated without re-versioning every prompt.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// One named group of dictionary entries for a language.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DictionaryGroup {
    pub group_id: String,
    pub language: String,
    pub entries: Vec<String>,
}

/// Lookup of dictionary groups by id and language.
///
/// Falls back are the caller's concern: [`crate::prompts::PromptRenderer`]
/// renders unknown groups as empty and logs.
pub trait Dictionary: Send + Sync {
    /// The group for `(group_id, language)`, if present.
    fn group(&self, group_id: &str, language: &str) -> Option<DictionaryGroup>;
}

/// In-memory dictionary backed by a concurrent map.
#[derive(Default)]
pub struct InMemoryDictionary {
    groups: DashMap<(String, String), DictionaryGroup>,
}

impl InMemoryDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a group.
    pub fn put(&self, group: DictionaryGroup) {
        self.groups
            .insert((group.group_id.clone(), group.language.clone()), group);
    }
}

impl Dictionary for InMemoryDictionary {
    fn group(&self, group_id: &str, language: &str) -> Option<DictionaryGroup> {
        self.groups
            .get(&(group_id.to_string(), language.to_string()))
            .map(|g| g.clone())
    }
}
