//! Embedding production (component B).
//!
//! Model loading and inference architecture is out of scope (see
//! SPEC_FULL.md §1 Non-goals) — callers plug in whatever backend produces
//! vectors. What this module owns is the *shape* of that contract: one
//! embedder per capability, addressed by a stable identity, constructed at
//! most once and cached behind a lock so concurrent first-callers don't each
//! pay construction cost.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use memsearch_core::Error;

/// Which embedding family a piece of text or code needs. Distinct from
/// `RerankerTier` even though the names rhyme — this selects a vector
/// space, not a scoring strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmbedderKind {
    DenseText,
    DenseCode,
    SparseLexical,
    MultiVector,
}

#[async_trait]
pub trait Embedder: Send + Sync {
    fn kind(&self) -> EmbedderKind;
    fn dim(&self) -> usize;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, Error>;
    async fn embed_document(&self, text: &str) -> Result<Vec<f32>, Error>;

    async fn embed_batch_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, Error> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed_document(text).await?);
        }
        Ok(out)
    }
}

/// Deterministic, hash-based stand-in for a real embedding model: same text
/// always maps to the same vector, unrelated texts land far apart on
/// average. Not semantically meaningful, but stable enough to exercise
/// fusion, filtering, and rerank-tier routing without a model dependency.
pub struct DeterministicEmbedder {
    kind: EmbedderKind,
    dim: usize,
}

impl DeterministicEmbedder {
    pub fn new(kind: EmbedderKind, dim: usize) -> Self {
        Self { kind, dim }
    }

    fn hash_embed(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dim];
        for (i, c) in text.chars().enumerate() {
            let idx = (c as usize).wrapping_add(i).wrapping_add(self.kind as usize * 7) % self.dim;
            embedding[idx] += 1.0;
        }
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut embedding {
                *v /= norm;
            }
        }
        embedding
    }
}

#[async_trait]
impl Embedder for DeterministicEmbedder {
    fn kind(&self) -> EmbedderKind {
        self.kind
    }

    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, Error> {
        Ok(self.hash_embed(text))
    }

    async fn embed_document(&self, text: &str) -> Result<Vec<f32>, Error> {
        Ok(self.hash_embed(text))
    }
}

/// Lazily constructs and caches one embedder per [`EmbedderKind`]. The lock
/// is only held during construction; callers receive an `Arc` they can use
/// concurrently afterwards.
pub struct EmbedderFactory {
    dense_dim: usize,
    multi_vector_dim: usize,
    instances: Mutex<HashMap<EmbedderKind, Arc<dyn Embedder>>>,
}

impl EmbedderFactory {
    pub fn new(dense_dim: usize, multi_vector_dim: usize) -> Self {
        Self {
            dense_dim,
            multi_vector_dim,
            instances: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &memsearch_config::EmbeddingConfig) -> Self {
        Self::new(config.dense_dim, config.multi_vector_dim)
    }

    pub fn get(&self, kind: EmbedderKind) -> Arc<dyn Embedder> {
        let mut instances = self.instances.lock();
        if let Some(existing) = instances.get(&kind) {
            return Arc::clone(existing);
        }
        let dim = match kind {
            EmbedderKind::MultiVector => self.multi_vector_dim,
            _ => self.dense_dim,
        };
        let embedder: Arc<dyn Embedder> = Arc::new(DeterministicEmbedder::new(kind, dim));
        instances.insert(kind, Arc::clone(&embedder));
        embedder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_text_yields_same_vector() {
        let embedder = DeterministicEmbedder::new(EmbedderKind::DenseText, 64);
        let a = embedder.embed_query("hello world").await.unwrap();
        let b = embedder.embed_query("hello world").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn vectors_are_unit_normalized() {
        let embedder = DeterministicEmbedder::new(EmbedderKind::DenseText, 32);
        let v = embedder.embed_query("some text").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn factory_caches_per_kind() {
        let factory = EmbedderFactory::new(64, 16);
        let a = factory.get(EmbedderKind::DenseText);
        let b = factory.get(EmbedderKind::DenseText);
        assert!(Arc::ptr_eq(&a, &b));

        let c = factory.get(EmbedderKind::MultiVector);
        assert_eq!(c.dim(), 16);
    }
}
