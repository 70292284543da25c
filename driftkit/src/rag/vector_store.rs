//! Vector store contract and the in-memory implementation.
//!
//! Documents are upserted by id, so re-ingesting the same source with stable
//! chunk ids updates in place without duplication. Search is either by query
//! vector (embedding-based backends) or raw text (backends that index text
//! themselves); [`VectorStore::embedding_based`] tells the retriever which
//! one to send.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;

use super::document::Document;

/// Store failure; carries the backend's raw message.
#[derive(Debug, Clone, thiserror::Error)]
#[error("vector store `{store}`: {message}")]
pub struct VectorStoreError {
    pub store: String,
    pub message: String,
}

impl VectorStoreError {
    pub fn new(store: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            store: store.into(),
            message: message.into(),
        }
    }
}

/// One search result: the stored document plus its similarity score.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub document: Document,
    pub score: f32,
}

/// Query shape handed to a store.
#[derive(Debug, Clone)]
pub enum StoreQuery {
    /// Pre-embedded query vector (embedding-based backends).
    Vector(Vec<f32>),
    /// Raw query text (backends with their own indexing).
    Text(String),
}

/// Named vector index backend.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Backend name (matches the `vector_store.name` config option).
    fn name(&self) -> &str;

    /// Whether queries must be embedded before search. When false the
    /// retriever sends [`StoreQuery::Text`] and skips query embedding.
    fn embedding_based(&self) -> bool {
        true
    }

    /// Inserts or replaces documents by id in the index.
    async fn upsert(&self, index: &str, documents: Vec<Document>)
        -> Result<(), VectorStoreError>;

    /// Top-k most similar documents for the query, best first.
    async fn search(
        &self,
        index: &str,
        query: &StoreQuery,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, VectorStoreError>;

    /// Removes the whole index.
    async fn delete_index(&self, index: &str) -> Result<(), VectorStoreError>;

    /// Number of documents in the index.
    async fn count(&self, index: &str) -> Result<usize, VectorStoreError>;
}

/// Cosine similarity; zero when either vector has zero magnitude.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Pure in-memory vector store: cosine similarity over stored vectors, no
/// persistence. The provided backend for single-instance deployments and
/// tests; durable backends are external collaborators.
#[derive(Default)]
pub struct InMemoryVectorStore {
    indexes: DashMap<String, HashMap<String, Document>>,
}

impl InMemoryVectorStore {
    pub const NAME: &'static str = "in-memory";

    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn upsert(
        &self,
        index: &str,
        documents: Vec<Document>,
    ) -> Result<(), VectorStoreError> {
        let mut entry = self.indexes.entry(index.to_string()).or_default();
        for document in documents {
            if document.vector.is_none() {
                return Err(VectorStoreError::new(
                    Self::NAME,
                    format!("document `{}` has no vector", document.id),
                ));
            }
            entry.insert(document.id.clone(), document);
        }
        Ok(())
    }

    async fn search(
        &self,
        index: &str,
        query: &StoreQuery,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, VectorStoreError> {
        let StoreQuery::Vector(query_vector) = query else {
            return Err(VectorStoreError::new(
                Self::NAME,
                "text queries are not supported; embed the query first",
            ));
        };
        let Some(entry) = self.indexes.get(index) else {
            return Ok(Vec::new());
        };
        let mut hits: Vec<SearchHit> = entry
            .values()
            .map(|document| {
                let score = document
                    .vector
                    .as_deref()
                    .map(|v| cosine_similarity(query_vector, v))
                    .unwrap_or(0.0);
                SearchHit {
                    document: document.clone(),
                    score,
                }
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete_index(&self, index: &str) -> Result<(), VectorStoreError> {
        self.indexes.remove(index);
        Ok(())
    }

    async fn count(&self, index: &str) -> Result<usize, VectorStoreError> {
        Ok(self.indexes.get(index).map(|e| e.len()).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, vector: Vec<f32>) -> Document {
        Document::new(id, format!("content of {id}")).with_vector(vector)
    }

    /// **Scenario**: Search ranks by cosine similarity, best first, truncated
    /// to top_k.
    #[tokio::test]
    async fn search_ranks_by_cosine() {
        let store = InMemoryVectorStore::new();
        store
            .upsert(
                "idx",
                vec![
                    doc("exact", vec![1.0, 0.0]),
                    doc("orthogonal", vec![0.0, 1.0]),
                    doc("close", vec![0.9, 0.1]),
                ],
            )
            .await
            .unwrap();

        let hits = store
            .search("idx", &StoreQuery::Vector(vec![1.0, 0.0]), 2)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.id, "exact");
        assert_eq!(hits[1].document.id, "close");
        assert!(hits[0].score > hits[1].score);
    }

    /// **Scenario**: Upserting the same id replaces the stored document, so
    /// re-ingestion with stable ids does not duplicate.
    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let store = InMemoryVectorStore::new();
        store
            .upsert("idx", vec![doc("a", vec![1.0, 0.0])])
            .await
            .unwrap();
        store
            .upsert("idx", vec![doc("a", vec![0.0, 1.0])])
            .await
            .unwrap();
        assert_eq!(store.count("idx").await.unwrap(), 1);

        let hits = store
            .search("idx", &StoreQuery::Vector(vec![0.0, 1.0]), 1)
            .await
            .unwrap();
        assert!(hits[0].score > 0.99, "replaced vector should match");
    }

    /// **Scenario**: A vectorless document is rejected at upsert.
    #[tokio::test]
    async fn upsert_requires_vector() {
        let store = InMemoryVectorStore::new();
        let err = store
            .upsert("idx", vec![Document::new("novec", "text")])
            .await
            .unwrap_err();
        assert!(err.message.contains("no vector"));
    }

    /// **Scenario**: Searching a missing index returns empty; delete_index
    /// clears stored documents.
    #[tokio::test]
    async fn missing_index_and_delete() {
        let store = InMemoryVectorStore::new();
        let hits = store
            .search("ghost", &StoreQuery::Vector(vec![1.0]), 5)
            .await
            .unwrap();
        assert!(hits.is_empty());

        store.upsert("idx", vec![doc("a", vec![1.0])]).await.unwrap();
        store.delete_index("idx").await.unwrap();
        assert_eq!(store.count("idx").await.unwrap(), 0);
    }
}
