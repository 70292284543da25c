//! Retrieval graph: embed query → search → filter → rerank → truncate.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::document::Document;
use super::embedder::{EmbedError, Embedder};
use super::reranker::{RerankError, Reranker};
use super::vector_store::{StoreQuery, VectorStore, VectorStoreError};

/// Retrieval failure.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    /// The store is embedding-based but no embedder is wired.
    #[error("retriever has no embedder for embedding-based store `{0}`")]
    MissingEmbedder(String),
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error(transparent)]
    Store(#[from] VectorStoreError),
    #[error(transparent)]
    Rerank(#[from] RerankError),
}

/// One retrieval call.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub query: String,
    pub index: String,
    pub top_k: usize,
    pub min_score: f32,
    /// Exact-match metadata filter; every entry must match.
    pub filter: HashMap<String, Value>,
    /// Prepended to the query before embedding (some embedding models are
    /// trained with an instruction prefix).
    pub query_prefix: Option<String>,
}

impl RetrievalRequest {
    pub fn new(query: impl Into<String>, index: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            index: index.into(),
            top_k: RetrieverDefaults::default().top_k,
            min_score: RetrieverDefaults::default().min_score,
            filter: HashMap::new(),
            query_prefix: None,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter.insert(key.into(), value.into());
        self
    }

    pub fn with_query_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.query_prefix = Some(prefix.into());
        self
    }
}

/// Default retrieval knobs (the `rag.retriever.*` config options).
#[derive(Debug, Clone)]
pub struct RetrieverDefaults {
    pub top_k: usize,
    pub min_score: f32,
    pub query_prefix: Option<String>,
}

impl Default for RetrieverDefaults {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_score: 0.0,
            query_prefix: None,
        }
    }
}

/// One retrieved candidate: the document, the store's similarity score, and
/// the reranker's score when reranking ran.
#[derive(Debug, Clone)]
pub struct RetrievedDocument {
    pub document: Document,
    pub original_score: f32,
    pub rerank_score: Option<f32>,
}

impl RetrievedDocument {
    /// Effective score: rerank score when present, else the original.
    pub fn score(&self) -> f32 {
        self.rerank_score.unwrap_or(self.original_score)
    }
}

/// The retrieval pipeline over one vector store.
pub struct Retriever {
    store: Arc<dyn VectorStore>,
    embedder: Option<Arc<dyn Embedder>>,
    reranker: Option<Arc<dyn Reranker>>,
    defaults: RetrieverDefaults,
}

impl Retriever {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self {
            store,
            embedder: None,
            reranker: None,
            defaults: RetrieverDefaults::default(),
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn with_defaults(mut self, defaults: RetrieverDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Request pre-filled with this retriever's defaults.
    pub fn request(&self, query: impl Into<String>, index: impl Into<String>) -> RetrievalRequest {
        let mut request = RetrievalRequest::new(query, index);
        request.top_k = self.defaults.top_k;
        request.min_score = self.defaults.min_score;
        request.query_prefix = self.defaults.query_prefix.clone();
        request
    }

    /// Runs the retrieval graph for one request.
    ///
    /// `top_k == 0` returns an empty list without touching the store. The
    /// query is embedded only for embedding-based backends. Results below
    /// `min_score` or failing the metadata filter are dropped before the
    /// optional rerank; the final list is truncated to `top_k`.
    pub async fn retrieve(
        &self,
        request: &RetrievalRequest,
    ) -> Result<Vec<RetrievedDocument>, RetrievalError> {
        if request.top_k == 0 {
            return Ok(Vec::new());
        }

        let query_text = match &request.query_prefix {
            Some(prefix) => format!("{prefix}{}", request.query),
            None => request.query.clone(),
        };

        let store_query = if self.store.embedding_based() {
            let embedder = self
                .embedder
                .as_ref()
                .ok_or_else(|| RetrievalError::MissingEmbedder(self.store.name().to_string()))?;
            let mut vectors = embedder.embed(&[query_text.as_str()]).await?;
            StoreQuery::Vector(vectors.pop().unwrap_or_default())
        } else {
            StoreQuery::Text(query_text)
        };

        let hits = self
            .store
            .search(&request.index, &store_query, request.top_k)
            .await?;

        let mut candidates: Vec<RetrievedDocument> = hits
            .into_iter()
            .filter(|hit| hit.score >= request.min_score)
            .filter(|hit| matches_filter(&hit.document, &request.filter))
            .map(|hit| RetrievedDocument {
                document: hit.document,
                original_score: hit.score,
                rerank_score: None,
            })
            .collect();

        if let Some(reranker) = &self.reranker {
            if !candidates.is_empty() {
                candidates = reranker.rerank(&request.query, candidates).await?;
            }
        }

        candidates.truncate(request.top_k);
        Ok(candidates)
    }
}

/// Exact-match metadata predicate: every filter entry must equal the
/// document's metadata value.
fn matches_filter(document: &Document, filter: &HashMap<String, Value>) -> bool {
    filter
        .iter()
        .all(|(key, expected)| document.metadata.get(key) == Some(expected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::embedder::MockEmbedder;
    use crate::rag::vector_store::{InMemoryVectorStore, SearchHit};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn seeded_store(embedder: &MockEmbedder) -> Arc<InMemoryVectorStore> {
        let store = Arc::new(InMemoryVectorStore::new());
        let contents = [
            ("rust-1", "rust workflow engine scheduling", "docs"),
            ("rust-2", "rust retry policies and breakers", "docs"),
            ("cook-1", "slow cooked banana dessert", "recipes"),
        ];
        let texts: Vec<&str> = contents.iter().map(|(_, c, _)| *c).collect();
        let vectors = embedder.embed(&texts).await.unwrap();
        let documents = contents
            .iter()
            .zip(vectors)
            .map(|((id, content, topic), vector)| {
                Document::new(*id, *content)
                    .with_metadata("topic", *topic)
                    .with_vector(vector)
            })
            .collect();
        store.upsert("idx", documents).await.unwrap();
        store
    }

    /// **Scenario**: top_k = 0 returns empty without invoking the store.
    #[tokio::test]
    async fn top_k_zero_short_circuits() {
        struct PanickyStore;
        #[async_trait]
        impl crate::rag::vector_store::VectorStore for PanickyStore {
            fn name(&self) -> &str {
                "panicky"
            }
            async fn upsert(
                &self,
                _: &str,
                _: Vec<Document>,
            ) -> Result<(), VectorStoreError> {
                Ok(())
            }
            async fn search(
                &self,
                _: &str,
                _: &StoreQuery,
                _: usize,
            ) -> Result<Vec<SearchHit>, VectorStoreError> {
                panic!("store must not be invoked for top_k == 0");
            }
            async fn delete_index(&self, _: &str) -> Result<(), VectorStoreError> {
                Ok(())
            }
            async fn count(&self, _: &str) -> Result<usize, VectorStoreError> {
                Ok(0)
            }
        }

        let retriever =
            Retriever::new(Arc::new(PanickyStore)).with_embedder(Arc::new(MockEmbedder::new(8)));
        let results = retriever
            .retrieve(&RetrievalRequest::new("q", "idx").with_top_k(0))
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    /// **Scenario**: Retrieval ranks related documents first and respects
    /// min_score and the metadata filter.
    #[tokio::test]
    async fn retrieve_filters_and_ranks() {
        let embedder = MockEmbedder::new(64);
        let store = seeded_store(&embedder).await;
        let retriever = Retriever::new(store).with_embedder(Arc::new(MockEmbedder::new(64)));

        let request = RetrievalRequest::new("rust workflow scheduling", "idx")
            .with_top_k(3)
            .with_min_score(0.01)
            .with_filter("topic", "docs");
        let results = retriever.retrieve(&request).await.unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.document.metadata_str("topic") == Some("docs")));
        assert_eq!(results[0].document.id, "rust-1");
        for pair in results.windows(2) {
            assert!(pair[0].original_score >= pair[1].original_score);
        }
    }

    /// **Scenario**: An embedding-based store without an embedder fails with
    /// MissingEmbedder.
    #[tokio::test]
    async fn missing_embedder_fails() {
        let store = Arc::new(InMemoryVectorStore::new());
        let retriever = Retriever::new(store);
        let err = retriever
            .retrieve(&RetrievalRequest::new("q", "idx").with_top_k(3))
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::MissingEmbedder(_)));
    }

    /// **Scenario**: The query prefix is prepended before embedding.
    #[tokio::test]
    async fn query_prefix_applies_before_embedding() {
        struct SpyEmbedder {
            calls: AtomicUsize,
        }
        #[async_trait]
        impl Embedder for SpyEmbedder {
            async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                assert_eq!(texts[0], "query: find me");
                Ok(vec![vec![1.0, 0.0]])
            }
            fn dimension(&self) -> usize {
                2
            }
        }

        let store = Arc::new(InMemoryVectorStore::new());
        let retriever = Retriever::new(store).with_embedder(Arc::new(SpyEmbedder {
            calls: AtomicUsize::new(0),
        }));
        let request = RetrievalRequest::new("find me", "idx")
            .with_top_k(2)
            .with_query_prefix("query: ");
        let results = retriever.retrieve(&request).await.unwrap();
        assert!(results.is_empty(), "empty index yields no hits");
    }

    /// **Scenario**: Retriever defaults pre-fill requests.
    #[test]
    fn defaults_prefill_requests() {
        let retriever = Retriever::new(Arc::new(InMemoryVectorStore::new())).with_defaults(
            RetrieverDefaults {
                top_k: 9,
                min_score: 0.25,
                query_prefix: Some("q: ".into()),
            },
        );
        let request = retriever.request("hello", "idx");
        assert_eq!(request.top_k, 9);
        assert_eq!(request.min_score, 0.25);
        assert_eq!(request.query_prefix.as_deref(), Some("q: "));
    }
}
