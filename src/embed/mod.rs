//! Text-to-vector embedding behind a swappable interface
//!
//! The default implementation wraps a local 384-dimension sentence model via
//! `fastembed` (feature `local-embeddings`). Tests substitute the
//! deterministic [`HashEmbedder`]. When no embedder is configured at all,
//! similarity tooling degrades rather than returning spurious results.

use async_trait::async_trait;

use crate::Result;

/// Fixed embedding dimension shared by every vector column.
pub const EMBEDDING_DIM: usize = 384;

/// Text-to-vector contract. Whitespace-only input yields the zero vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }
}

impl std::fmt::Debug for dyn Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn Embedder").finish()
    }
}

/// Deterministic token-bucket embedder for tests and offline operation.
///
/// Each whitespace token hashes into one of the 384 buckets; the resulting
/// count vector is L2-normalised. Texts sharing most of their tokens score
/// high cosine similarity, which is all the test suite needs.
pub struct HashEmbedder;

impl HashEmbedder {
    fn bucket(token: &str) -> usize {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        token.hash(&mut hasher);
        (hasher.finish() as usize) % EMBEDDING_DIM
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; EMBEDDING_DIM];
        if text.trim().is_empty() {
            return Ok(vector);
        }
        for token in text.split_whitespace() {
            vector[Self::bucket(&token.to_lowercase())] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

#[cfg(feature = "local-embeddings")]
pub use self::local::LocalEmbedder;

#[cfg(feature = "local-embeddings")]
mod local {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

    use super::{Embedder, EMBEDDING_DIM};
    use crate::{Error, Result};

    /// Local BGE-small-en-v1.5 model (384 dimensions) via fastembed.
    pub struct LocalEmbedder {
        model: Arc<Mutex<TextEmbedding>>,
    }

    impl LocalEmbedder {
        pub fn new() -> Result<Self> {
            let options =
                InitOptions::new(EmbeddingModel::BGESmallENV15).with_show_download_progress(false);
            let model = TextEmbedding::try_new(options)
                .map_err(|e| Error::internal(format!("failed to load embedding model: {e}")))?;
            Ok(Self {
                model: Arc::new(Mutex::new(model)),
            })
        }

        async fn encode(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            let model = Arc::clone(&self.model);
            // Model inference is CPU-bound; keep it off the async workers.
            tokio::task::spawn_blocking(move || {
                let mut guard = model
                    .lock()
                    .map_err(|_| Error::internal("embedding model mutex poisoned"))?;
                let model = &mut *guard;
                model
                    .embed(texts, None)
                    .map_err(|e| Error::internal(format!("embedding failed: {e}")))
            })
            .await
            .map_err(|e| Error::internal(format!("embedding task panicked: {e}")))?
        }
    }

    #[async_trait]
    impl Embedder for LocalEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if text.trim().is_empty() {
                return Ok(vec![0.0; EMBEDDING_DIM]);
            }
            let mut vectors = self.encode(vec![text.to_string()]).await?;
            vectors
                .pop()
                .ok_or_else(|| Error::internal("embedding model returned no vector"))
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            self.encode(texts.to_vec()).await
        }
    }
}

/// Cosine similarity between two equal-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
    let norm_a: f64 = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_embedder_dimension() {
        let embedder = HashEmbedder;
        let vector = embedder.embed("probe the login form").await.expect("should embed");
        assert_eq!(vector.len(), EMBEDDING_DIM);
    }

    #[tokio::test]
    async fn test_blank_input_yields_zero_vector() {
        let embedder = HashEmbedder;
        let vector = embedder.embed("   \n\t ").await.expect("should embed");
        assert!(vector.iter().all(|v| *v == 0.0));
    }

    #[tokio::test]
    async fn test_identical_text_is_identical_vector() {
        let embedder = HashEmbedder;
        let a = embedder.embed("union select injection").await.expect("should embed");
        let b = embedder.embed("union select injection").await.expect("should embed");
        assert_eq!(a, b);
        assert!(cosine_similarity(&a, &b) > 0.999);
    }

    #[tokio::test]
    async fn test_mostly_shared_tokens_score_high() {
        let embedder = HashEmbedder;
        let a = embedder
            .embed("unicode sqli bypass via smart quote in search parameter handling")
            .await
            .expect("should embed");
        let b = embedder
            .embed("unicode sqli bypass via smart quote in search parameter handling again")
            .await
            .expect("should embed");
        assert!(cosine_similarity(&a, &b) >= 0.9);
    }

    #[tokio::test]
    async fn test_embed_batch_matches_single() {
        let embedder = HashEmbedder;
        let batch = embedder
            .embed_batch(&["alpha beta".to_string(), "gamma".to_string()])
            .await
            .expect("should embed batch");
        let single = embedder.embed("alpha beta").await.expect("should embed");
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], single);
    }
}
