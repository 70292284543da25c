//! Document data model shared by ingestion and retrieval.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata key: origin of the document (path or URL).
pub const META_SOURCE: &str = "source";
/// Metadata key: zero-based index of a chunk within its parent.
pub const META_CHUNK_INDEX: &str = "chunk_index";
/// Metadata key: id of the parent document a chunk came from.
pub const META_PARENT_ID: &str = "parent_id";
/// Metadata key: hash of the parent content; stable across re-ingestion of
/// unchanged sources.
pub const META_CONTENT_HASH: &str = "content_hash";

/// One retrievable document (or chunk): content, optional vector, metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    pub page_content: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, page_content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            vector: None,
            page_content: page_content.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_vector(mut self, vector: Vec<f32>) -> Self {
        self.vector = Some(vector);
        self
    }

    /// String view of a metadata value, if present.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// Raw bytes plus origin metadata, as produced by a loader before decoding.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub id: String,
    pub bytes: Vec<u8>,
    pub metadata: HashMap<String, Value>,
}

impl LoadedDocument {
    pub fn new(id: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            bytes,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Decodes the bytes as UTF-8 into a text [`Document`], carrying the
    /// origin metadata over.
    pub fn into_text_document(self) -> Result<Document, std::string::FromUtf8Error> {
        let text = String::from_utf8(self.bytes)?;
        Ok(Document {
            id: self.id,
            vector: None,
            page_content: text,
            metadata: self.metadata,
        })
    }
}

/// Outcome of ingesting one document: chunks stored plus any errors.
#[derive(Debug, Clone, Default)]
pub struct DocumentResult {
    pub document_id: String,
    pub chunks_stored: usize,
    pub errors: Vec<String>,
}

impl DocumentResult {
    pub fn success(document_id: impl Into<String>, chunks_stored: usize) -> Self {
        Self {
            document_id: document_id.into(),
            chunks_stored,
            errors: Vec::new(),
        }
    }

    pub fn failure(document_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            chunks_stored: 0,
            errors: vec![error.into()],
        }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Stable content hash used for idempotent re-ingestion. Not cryptographic.
pub fn content_hash(content: &str) -> String {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Stable id for the `index`-th chunk of `parent_id`. Re-ingesting unchanged
/// content produces the same ids, so stores update in place.
pub fn chunk_id(parent_id: &str, index: usize) -> String {
    format!("{parent_id}::{index}")
}
