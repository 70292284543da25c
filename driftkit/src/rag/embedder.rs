//! Embedder contract: fixed-size float vectors from text.
//!
//! Concrete embedding-model adapters are external collaborators; this module
//! defines the trait plus a deterministic mock for tests and single-process
//! use.

use async_trait::async_trait;

/// Embedding failure; carries the adapter's raw message.
#[derive(Debug, Clone, thiserror::Error)]
#[error("embedding failed: {0}")]
pub struct EmbedError(pub String);

/// Produces fixed-size float vectors from text, one vector per input in the
/// same order. Used to index chunk text on ingestion and query text on
/// retrieval.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds each text into a vector of [`Embedder::dimension`] floats.
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Vector dimension returned by [`Embedder::embed`].
    fn dimension(&self) -> usize;
}

/// Deterministic embedder for tests: token hashes bucketed into a fixed
/// dimension and L2-normalized, so texts sharing words come out similar.
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0f32; self.dimension];
                for token in text.split_whitespace() {
                    let token = token.to_lowercase();
                    let mut hash = 0usize;
                    for b in token.bytes() {
                        hash = hash.wrapping_mul(31).wrapping_add(b as usize);
                    }
                    vector[hash % self.dimension] += 1.0;
                }
                let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
                if norm > 0.0 {
                    for v in &mut vector {
                        *v /= norm;
                    }
                }
                vector
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    /// **Scenario**: The mock is deterministic and dimension-stable.
    #[tokio::test]
    async fn mock_embedder_is_deterministic() {
        let embedder = MockEmbedder::new(32);
        let a = embedder.embed(&["hello world"]).await.unwrap();
        let b = embedder.embed(&["hello world"]).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 32);
    }

    /// **Scenario**: Overlapping texts are more similar than disjoint ones.
    #[tokio::test]
    async fn mock_embedder_orders_similarity_sensibly() {
        let embedder = MockEmbedder::new(64);
        let vectors = embedder
            .embed(&[
                "rust async workflow engine",
                "rust workflow scheduler",
                "banana smoothie recipe",
            ])
            .await
            .unwrap();
        let close = cosine(&vectors[0], &vectors[1]);
        let far = cosine(&vectors[0], &vectors[2]);
        assert!(close > far, "related texts should score higher: {close} vs {far}");
    }
}
