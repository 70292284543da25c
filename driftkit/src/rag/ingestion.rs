//! Ingestion pipeline: load → split → embed → store.
//!
//! Documents are processed concurrently under a semaphore bound with
//! per-document fixed-delay retry; a document that still fails after the cap
//! surfaces as an error result without stopping its siblings. A progress
//! listener observes loads, per-document completion, and every stored chunk.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use super::document::{Document, DocumentResult, LoadedDocument};
use super::embedder::{EmbedError, Embedder};
use super::loader::{DocumentLoader, LoaderError};
use super::splitter::{SplitterError, TextSplitter};
use super::vector_store::{VectorStore, VectorStoreError};

/// Ingestion failure for one document (or the whole run when loading fails).
#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    #[error(transparent)]
    Loader(#[from] LoaderError),
    #[error("decode `{document_id}`: {message}")]
    Decode {
        document_id: String,
        message: String,
    },
    #[error(transparent)]
    Splitter(#[from] SplitterError),
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error(transparent)]
    Store(#[from] VectorStoreError),
}

/// Progress callbacks. Default implementations are no-ops so listeners
/// implement only what they need.
pub trait IngestionListener: Send + Sync {
    fn on_document_loaded(&self, _document_id: &str) {}
    fn on_document_processed(&self, _result: &DocumentResult) {}
    fn on_chunk_stored(&self, _document_id: &str, _chunk_id: &str) {}
}

/// Listener that ignores every callback.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopIngestionListener;

impl IngestionListener for NoopIngestionListener {}

/// Concurrency and retry knobs for one pipeline.
#[derive(Debug, Clone)]
pub struct IngestionOptions {
    /// Documents processed at once.
    pub max_concurrency: usize,
    /// Retries per document after the first attempt.
    pub max_retries: u32,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            max_retries: 2,
            retry_delay: Duration::from_millis(200),
        }
    }
}

/// The ingestion graph: loader → splitter → embedder → vector store.
pub struct IngestionPipeline {
    loader: Arc<dyn DocumentLoader>,
    splitter: Arc<dyn TextSplitter>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    index: String,
    options: IngestionOptions,
    listener: Arc<dyn IngestionListener>,
}

impl IngestionPipeline {
    pub fn new(
        loader: Arc<dyn DocumentLoader>,
        splitter: Arc<dyn TextSplitter>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        index: impl Into<String>,
    ) -> Self {
        Self {
            loader,
            splitter,
            embedder,
            store,
            index: index.into(),
            options: IngestionOptions::default(),
            listener: Arc::new(NoopIngestionListener),
        }
    }

    pub fn with_options(mut self, options: IngestionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn IngestionListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Runs the pipeline. `Err` only when loading itself fails; per-document
    /// failures come back as error results, in input order.
    pub async fn run(&self) -> Result<Vec<DocumentResult>, IngestionError> {
        let loaded = self.loader.load().await?;
        for doc in &loaded {
            self.listener.on_document_loaded(&doc.id);
        }

        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrency.max(1)));
        let tasks = loaded.into_iter().map(|doc| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore open");
                self.process_with_retry(doc).await
            }
        });
        let results = futures::future::join_all(tasks).await;
        for result in &results {
            self.listener.on_document_processed(result);
        }
        Ok(results)
    }

    /// Fixed-delay retry around one document; exhaustion yields an error
    /// result rather than an Err so siblings are unaffected.
    async fn process_with_retry(&self, doc: LoadedDocument) -> DocumentResult {
        let document_id = doc.id.clone();
        let attempts = self.options.max_retries + 1;
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.process_document(doc.clone()).await {
                Ok(chunks_stored) => {
                    return DocumentResult::success(document_id, chunks_stored);
                }
                Err(e) => {
                    last_error = e.to_string();
                    tracing::warn!(
                        document_id = %document_id,
                        attempt,
                        error = %last_error,
                        "document ingestion attempt failed"
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.options.retry_delay).await;
                    }
                }
            }
        }
        DocumentResult::failure(document_id, last_error)
    }

    async fn process_document(&self, doc: LoadedDocument) -> Result<usize, IngestionError> {
        let document_id = doc.id.clone();
        let text_doc: Document =
            doc.into_text_document()
                .map_err(|e| IngestionError::Decode {
                    document_id: document_id.clone(),
                    message: e.to_string(),
                })?;

        let mut chunks = self.splitter.split(&text_doc).await?;
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<&str> = chunks.iter().map(|c| c.page_content.as_str()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        for (chunk, vector) in chunks.iter_mut().zip(vectors.into_iter()) {
            chunk.vector = Some(vector);
        }

        let chunk_ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
        let stored = chunks.len();
        self.store.upsert(&self.index, chunks).await?;
        for chunk_id in &chunk_ids {
            self.listener.on_chunk_stored(&document_id, chunk_id);
        }
        Ok(stored)
    }
}
