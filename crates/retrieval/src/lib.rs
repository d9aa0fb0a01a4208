//! Retrieval engine: embedders, vector store client, lexical index, reranker
//! tiers and router, and the three retriever entry points (single-query
//! hybrid, multi-query expansion, session-aware) built on top of them.

pub mod chunker;
pub mod embeddings;
pub mod hybrid;
pub mod multi_query;
pub mod rate_limiter;
pub mod reranker;
pub mod router;
pub mod session;
pub mod sparse_search;
pub mod vector_store;

pub use chunker::{Chunk, SemanticChunker};
pub use embeddings::{Embedder, EmbedderFactory, EmbedderKind};
pub use hybrid::HybridRetriever;
pub use multi_query::MultiQueryRetriever;
pub use rate_limiter::SlidingWindowLimiter;
pub use reranker::RerankerBackend;
pub use router::{RerankerRouter, RouterResult};
pub use session::SessionAwareRetriever;
pub use sparse_search::{SharedSparseIndex, SparseHit, SparseIndex};
pub use vector_store::{StoreError, StoreHit, VectorStore};
