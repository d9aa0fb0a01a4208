//! Centralized constants: environment-backed defaults for external
//! collaborator endpoints, plus typed default-value modules per retriever
//! concern.

use once_cell::sync::Lazy;

/// Default endpoints for external collaborators, overridable per-deployment
/// via environment variables.
pub mod endpoints {
    use super::Lazy;

    pub static QDRANT_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("QDRANT_URL").unwrap_or_else(|_| "http://localhost:6334".to_string())
    });

    pub static OLLAMA_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("OLLAMA_URL").unwrap_or_else(|_| "http://localhost:11434".to_string())
    });

    pub static OPENAI_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string())
    });
}

/// Default timeouts, in milliseconds unless noted.
pub mod timeouts {
    pub const RERANK_DEFAULT_MS: u64 = 5_000;
    pub const VECTOR_STORE_DEFAULT_MS: u64 = 30_000;
    pub const LLM_REQUEST_DEFAULT_MS: u64 = 60_000;
}

/// Retrieval defaults shared across hybrid/multi-query/session retrievers.
pub mod retrieval {
    pub const DEFAULT_TOP_K: usize = 10;
    pub const MAX_LIMIT: usize = 1_000;
    pub const PREFETCH_DEPTH_FLOOR: usize = 20;
    pub const PREFETCH_DEPTH_MULTIPLIER_WITH_RERANK: usize = 4;
    pub const PREFETCH_DEPTH_MULTIPLIER_NO_RERANK: usize = 1;
    pub const RRF_K_DEFAULT: f32 = 60.0;
}

/// Reranker defaults.
pub mod reranker {
    pub const LLM_DOC_CHAR_BUDGET: usize = 500;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_defaults_are_non_empty() {
        assert!(!endpoints::QDRANT_DEFAULT.is_empty());
        assert!(!endpoints::OLLAMA_DEFAULT.is_empty());
        assert!(!endpoints::OPENAI_DEFAULT.is_empty());
    }

    #[test]
    fn retrieval_constants_are_sane() {
        assert!(retrieval::DEFAULT_TOP_K > 0);
        assert!(retrieval::MAX_LIMIT >= retrieval::DEFAULT_TOP_K);
        assert!(retrieval::RRF_K_DEFAULT > 0.0);
    }
}
