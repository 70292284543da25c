//! Chunk and error payloads for a model output stream.
//!
//! A stream delivers zero or more [`StreamChunk`]s followed by exactly one
//! terminal signal: completion or [`StreamError`].

use serde::{Deserialize, Serialize};

/// One incremental piece of model output.
///
/// `content` is the text delta for this chunk; `index` is the zero-based
/// position of the chunk within its stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Text delta carried by this chunk.
    pub content: String,
    /// Zero-based chunk position within the stream.
    pub index: u64,
}

impl StreamChunk {
    /// Creates a chunk with the given content and position.
    pub fn new(content: impl Into<String>, index: u64) -> Self {
        Self {
            content: content.into(),
            index,
        }
    }
}

/// Terminal stream failure: the provider's message, verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamError {
    /// Raw provider / transport message.
    pub message: String,
}

impl StreamError {
    /// Creates a stream error from any displayable message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stream error: {}", self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: A chunk round-trips through serde with content and index intact.
    #[test]
    fn chunk_serialize_deserialize_roundtrip() {
        let chunk = StreamChunk::new("hello", 3);
        let json = serde_json::to_string(&chunk).expect("serialize");
        let back: StreamChunk = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, chunk);
    }

    /// **Scenario**: StreamError Display contains the raw message.
    #[test]
    fn stream_error_display_contains_message() {
        let err = StreamError::new("rate limited");
        assert!(err.to_string().contains("rate limited"));
    }
}
