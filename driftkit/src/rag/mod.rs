//! Retrieval pipeline: ingestion (load → split → embed → store) and
//! retrieval (embed query → search → filter → rerank).
//!
//! Both halves share the [`Document`] data model. Ingestion runs documents
//! concurrently under a bounded permit count with per-document retry;
//! failures surface as per-document error results without stopping siblings.
//! Retrieval applies `top_k` / `min_score` / metadata filters and can feed
//! candidates through a model-based reranker.

pub mod document;
pub mod embedder;
pub mod ingestion;
pub mod loader;
pub mod reranker;
pub mod retriever;
pub mod splitter;
pub mod vector_store;

pub use document::{Document, DocumentResult, LoadedDocument};
pub use embedder::{EmbedError, Embedder, MockEmbedder};
pub use ingestion::{
    IngestionError, IngestionListener, IngestionOptions, IngestionPipeline, NoopIngestionListener,
};
pub use loader::{CompositeLoader, DocumentLoader, FileSystemLoader, LoaderError, UrlLoader};
pub use reranker::{ModelBasedReranker, RerankError, Reranker};
pub use retriever::{
    RetrievalError, RetrievalRequest, RetrievedDocument, Retriever, RetrieverDefaults,
};
pub use splitter::{RecursiveCharacterSplitter, SemanticSplitter, SplitterError, TextSplitter};
pub use vector_store::{InMemoryVectorStore, SearchHit, StoreQuery, VectorStore, VectorStoreError};
