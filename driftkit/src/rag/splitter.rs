//! Text splitters: recursive-character and semantic chunking.
//!
//! Both splitters emit chunk [`Document`]s that preserve the parent's
//! metadata and add `chunk_index` / `parent_id` / `content_hash`, with chunk
//! ids stable across re-ingestion of unchanged content. Sizes are measured
//! in characters.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use super::document::{chunk_id, content_hash, Document, META_CHUNK_INDEX, META_CONTENT_HASH, META_PARENT_ID};
use super::embedder::{EmbedError, Embedder};
use super::vector_store::cosine_similarity;

/// Splitter construction or execution failure.
#[derive(Debug, thiserror::Error)]
pub enum SplitterError {
    /// `chunk_overlap` must be strictly smaller than `chunk_size`.
    #[error("chunk_overlap ({overlap}) must be smaller than chunk_size ({size})")]
    OverlapTooLarge { overlap: usize, size: usize },
    #[error("invalid splitter config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Embed(#[from] EmbedError),
}

/// Splits one document into chunk documents.
#[async_trait]
pub trait TextSplitter: Send + Sync {
    async fn split(&self, document: &Document) -> Result<Vec<Document>, SplitterError>;
}

/// Builds one chunk document, carrying parent metadata plus chunk markers.
fn chunk_document(parent: &Document, index: usize, content: String) -> Document {
    let mut chunk = Document::new(chunk_id(&parent.id, index), content);
    chunk.metadata = parent.metadata.clone();
    chunk
        .metadata
        .insert(META_CHUNK_INDEX.to_string(), serde_json::json!(index));
    chunk
        .metadata
        .insert(META_PARENT_ID.to_string(), serde_json::json!(parent.id));
    chunk.metadata.insert(
        META_CONTENT_HASH.to_string(),
        serde_json::json!(content_hash(&parent.page_content)),
    );
    chunk
}

/// Character splitter with a separator hierarchy.
///
/// Splits on paragraph, then line, then word boundaries, falling back to raw
/// character windows for unbreakable runs; adjacent pieces merge into chunks
/// up to `chunk_size` with `chunk_overlap` characters carried between
/// consecutive chunks.
#[derive(Debug)]
pub struct RecursiveCharacterSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl RecursiveCharacterSplitter {
    /// Validates the configuration: `chunk_overlap >= chunk_size` is rejected.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, SplitterError> {
        if chunk_size == 0 {
            return Err(SplitterError::InvalidConfig(
                "chunk_size must be positive".into(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(SplitterError::OverlapTooLarge {
                overlap: chunk_overlap,
                size: chunk_size,
            });
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    /// Splits raw text into chunk strings.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        let pieces = self.break_pieces(text, &["\n\n", "\n", " "]);
        self.merge_pieces(pieces)
    }

    /// Recursively breaks text into pieces no longer than `chunk_size`.
    fn break_pieces(&self, text: &str, separators: &[&str]) -> Vec<String> {
        if char_len(text) <= self.chunk_size {
            let trimmed = text.trim();
            return if trimmed.is_empty() {
                Vec::new()
            } else {
                vec![trimmed.to_string()]
            };
        }
        let Some((sep, rest)) = separators.split_first() else {
            return char_windows(text, self.chunk_size, self.chunk_overlap);
        };
        let mut pieces = Vec::new();
        for part in text.split(sep) {
            if char_len(part) > self.chunk_size {
                pieces.extend(self.break_pieces(part, rest));
            } else {
                let trimmed = part.trim();
                if !trimmed.is_empty() {
                    pieces.push(trimmed.to_string());
                }
            }
        }
        pieces
    }

    /// Merges pieces into chunks up to `chunk_size`, carrying the overlap
    /// tail of each chunk into the next. The tail is dropped when it would
    /// push the next chunk past `chunk_size`.
    fn merge_pieces(&self, pieces: Vec<String>) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current = String::new();
        for piece in pieces {
            if !current.is_empty()
                && char_len(&current) + 1 + char_len(&piece) > self.chunk_size
            {
                chunks.push(current.clone());
                current = tail_chars(&current, self.chunk_overlap);
                if !current.is_empty()
                    && char_len(&current) + 1 + char_len(&piece) > self.chunk_size
                {
                    current.clear();
                }
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&piece);
        }
        if !current.trim().is_empty() {
            chunks.push(current);
        }
        chunks
    }
}

#[async_trait]
impl TextSplitter for RecursiveCharacterSplitter {
    async fn split(&self, document: &Document) -> Result<Vec<Document>, SplitterError> {
        Ok(self
            .split_text(&document.page_content)
            .into_iter()
            .enumerate()
            .map(|(index, content)| chunk_document(document, index, content))
            .collect())
    }
}

static SENTENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^.!?\n]+[.!?]*\s*").expect("sentence regex"));

/// Embedding-similarity splitter: sentences group while their similarity to
/// the running group stays at or above the threshold, bounded by
/// `min/target/max` chunk sizes.
pub struct SemanticSplitter {
    embedder: Arc<dyn Embedder>,
    target_chunk_size: usize,
    max_chunk_size: usize,
    min_chunk_size: usize,
    similarity_threshold: f32,
}

impl SemanticSplitter {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        target_chunk_size: usize,
        max_chunk_size: usize,
        min_chunk_size: usize,
        similarity_threshold: f32,
    ) -> Result<Self, SplitterError> {
        if min_chunk_size > target_chunk_size || target_chunk_size > max_chunk_size {
            return Err(SplitterError::InvalidConfig(format!(
                "chunk sizes must satisfy min <= target <= max, got {min_chunk_size}/{target_chunk_size}/{max_chunk_size}"
            )));
        }
        if !(-1.0..=1.0).contains(&similarity_threshold) {
            return Err(SplitterError::InvalidConfig(
                "similarity_threshold must be within [-1, 1]".into(),
            ));
        }
        Ok(Self {
            embedder,
            target_chunk_size,
            max_chunk_size,
            min_chunk_size,
            similarity_threshold,
        })
    }

    fn sentences(text: &str) -> Vec<String> {
        SENTENCE
            .find_iter(text)
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

#[async_trait]
impl TextSplitter for SemanticSplitter {
    async fn split(&self, document: &Document) -> Result<Vec<Document>, SplitterError> {
        let sentences = Self::sentences(&document.page_content);
        if sentences.is_empty() {
            return Ok(Vec::new());
        }
        let refs: Vec<&str> = sentences.iter().map(String::as_str).collect();
        let vectors = self.embedder.embed(&refs).await?;

        let mut chunks: Vec<String> = Vec::new();
        let mut group = sentences[0].clone();
        let mut centroid = vectors[0].clone();
        let mut members = 1usize;

        for (sentence, vector) in sentences.iter().zip(vectors.iter()).skip(1) {
            let group_len = char_len(&group);
            let candidate_len = group_len + 1 + char_len(sentence);
            let similar = cosine_similarity(&centroid, vector) >= self.similarity_threshold;
            let must_grow = group_len < self.min_chunk_size;
            let fits = candidate_len <= self.max_chunk_size;
            let reached_target = group_len >= self.target_chunk_size;

            if fits && !reached_target && (similar || must_grow) {
                group.push(' ');
                group.push_str(sentence);
                for (c, v) in centroid.iter_mut().zip(vector.iter()) {
                    *c = (*c * members as f32 + v) / (members as f32 + 1.0);
                }
                members += 1;
            } else {
                chunks.push(group);
                group = sentence.clone();
                centroid = vector.clone();
                members = 1;
            }
        }
        chunks.push(group);

        Ok(chunks
            .into_iter()
            .enumerate()
            .map(|(index, content)| chunk_document(document, index, content))
            .collect())
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Last `n` characters of `s` (whole string when shorter).
fn tail_chars(s: &str, n: usize) -> String {
    if n == 0 {
        return String::new();
    }
    let len = char_len(s);
    if len <= n {
        return s.to_string();
    }
    s.chars().skip(len - n).collect()
}

/// Raw character windows of `size` stepping by `size - overlap`.
fn char_windows(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let step = size.saturating_sub(overlap).max(1);
    let mut out = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        let piece: String = chars[start..end].iter().collect();
        let trimmed = piece.trim();
        if !trimmed.is_empty() {
            out.push(trimmed.to_string());
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::embedder::MockEmbedder;
    use crate::rag::document::{META_CHUNK_INDEX, META_PARENT_ID, META_SOURCE};

    /// **Scenario**: chunk_overlap >= chunk_size is rejected at construction.
    #[test]
    fn overlap_must_be_smaller_than_size() {
        let err = RecursiveCharacterSplitter::new(100, 100).unwrap_err();
        assert!(matches!(
            err,
            SplitterError::OverlapTooLarge {
                overlap: 100,
                size: 100
            }
        ));
        assert!(RecursiveCharacterSplitter::new(100, 20).is_ok());
        assert!(matches!(
            RecursiveCharacterSplitter::new(0, 0),
            Err(SplitterError::InvalidConfig(_))
        ));
    }

    /// **Scenario**: Short text yields a single chunk; long text splits into
    /// chunks bounded by chunk_size.
    #[test]
    fn split_text_respects_chunk_size() {
        let splitter = RecursiveCharacterSplitter::new(40, 5).unwrap();
        assert_eq!(splitter.split_text("short"), vec!["short"]);

        let long = "one two three four five six seven eight nine ten eleven twelve \
                    thirteen fourteen fifteen sixteen";
        let chunks = splitter.split_text(long);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 40, "chunk too long: {chunk:?}");
        }
    }

    /// **Scenario**: Consecutive chunks share the configured overlap tail.
    #[test]
    fn consecutive_chunks_overlap() {
        let splitter = RecursiveCharacterSplitter::new(20, 8).unwrap();
        let chunks = splitter.split_text("aaaa bbbb cccc dddd eeee ffff gggg hhhh");
        assert!(chunks.len() >= 2);
        for pair in chunks.windows(2) {
            let tail: String = tail_chars(&pair[0], 8);
            assert!(
                pair[1].starts_with(&tail),
                "chunk {:?} should start with overlap of {:?}",
                pair[1],
                pair[0]
            );
        }
    }

    /// **Scenario**: An unbreakable run falls back to character windows.
    #[test]
    fn unbreakable_run_uses_char_windows() {
        let splitter = RecursiveCharacterSplitter::new(10, 2).unwrap();
        let chunks = splitter.split_text(&"x".repeat(25));
        assert!(chunks.len() >= 3);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 10);
        }
    }

    /// **Scenario**: Chunk documents preserve parent metadata and carry
    /// chunk_index / parent_id; ids are stable across runs.
    #[tokio::test]
    async fn chunks_preserve_metadata_and_stable_ids() {
        let splitter = RecursiveCharacterSplitter::new(20, 0).unwrap();
        let parent = Document::new("doc-1", "alpha beta gamma delta epsilon zeta eta theta")
            .with_metadata(META_SOURCE, "notes.txt");

        let first = splitter.split(&parent).await.unwrap();
        let second = splitter.split(&parent).await.unwrap();
        assert!(first.len() > 1);
        for (i, chunk) in first.iter().enumerate() {
            assert_eq!(chunk.id, format!("doc-1::{i}"));
            assert_eq!(chunk.metadata_str(META_SOURCE), Some("notes.txt"));
            assert_eq!(chunk.metadata[META_CHUNK_INDEX], serde_json::json!(i));
            assert_eq!(chunk.metadata[META_PARENT_ID], serde_json::json!("doc-1"));
        }
        let ids_a: Vec<_> = first.iter().map(|c| c.id.clone()).collect();
        let ids_b: Vec<_> = second.iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids_a, ids_b, "re-splitting produces the same chunk ids");
    }

    /// **Scenario**: The semantic splitter validates its size ordering and
    /// threshold range.
    #[test]
    fn semantic_splitter_validates_config() {
        let embedder = Arc::new(MockEmbedder::new(16));
        assert!(SemanticSplitter::new(embedder.clone(), 100, 50, 10, 0.5).is_err());
        assert!(SemanticSplitter::new(embedder.clone(), 100, 200, 10, 1.5).is_err());
        assert!(SemanticSplitter::new(embedder, 100, 200, 10, 0.5).is_ok());
    }

    /// **Scenario**: The semantic splitter groups sentences and never exceeds
    /// max_chunk_size.
    #[tokio::test]
    async fn semantic_splitter_groups_sentences() {
        let embedder = Arc::new(MockEmbedder::new(32));
        let splitter = SemanticSplitter::new(embedder, 60, 120, 10, -1.0).unwrap();
        let parent = Document::new(
            "doc",
            "The engine schedules steps. The engine retries failures. \
             Bananas are yellow. Bananas taste sweet.",
        );
        let chunks = splitter.split(&parent).await.unwrap();
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(chunk.page_content.chars().count() <= 120);
        }
        let rejoined: Vec<_> = chunks.iter().map(|c| c.page_content.clone()).collect();
        assert!(rejoined.join(" ").contains("Bananas are yellow."));
    }
}
