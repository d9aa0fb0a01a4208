//! Typed configuration structs, one per retriever/component, plus the
//! layered `Settings` loader that assembles them from file + environment.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{reranker, retrieval, timeouts};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Load(err.to_string())
    }
}

impl From<ConfigError> for memsearch_core::Error {
    fn from(err: ConfigError) -> Self {
        memsearch_core::Error::BadInput(err.to_string())
    }
}

/// Distance metric for a named vector field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    Cosine,
    Dot,
    Euclidean,
}

/// Vector store connection + collection schema configuration (§4.A, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub turns_collection: String,
    pub sessions_collection: String,
    pub dense_vector_name: String,
    pub sparse_vector_name: String,
    pub multi_vector_name: String,
    pub dense_dim: usize,
    pub multi_vector_dim: usize,
    pub distance: DistanceMetric,
    pub store_timeout_ms: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: crate::constants::endpoints::QDRANT_DEFAULT.clone(),
            api_key: None,
            turns_collection: "conversation_turns".to_string(),
            sessions_collection: "conversation_sessions".to_string(),
            dense_vector_name: "dense".to_string(),
            sparse_vector_name: "sparse".to_string(),
            multi_vector_name: "colbert".to_string(),
            dense_dim: 1024,
            multi_vector_dim: 128,
            distance: DistanceMetric::Cosine,
            store_timeout_ms: timeouts::VECTOR_STORE_DEFAULT_MS,
        }
    }
}

/// Embedder set configuration (§4.B): one entry per capability family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub dense_text_model: String,
    pub dense_code_model: String,
    pub multi_vector_model: String,
    pub dense_dim: usize,
    pub multi_vector_dim: usize,
    pub sparse_vocab_size: usize,
    pub batch_size: usize,
    pub endpoint: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dense_text_model: "text-embedding-dense-v1".to_string(),
            dense_code_model: "code-embedding-dense-v1".to_string(),
            multi_vector_model: "colbert-v2".to_string(),
            dense_dim: 1024,
            multi_vector_dim: 128,
            sparse_vocab_size: 30_000,
            batch_size: 32,
            endpoint: None,
        }
    }
}

/// Sliding-window limiter configuration (§4.D).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    pub max_requests: u64,
    pub max_cost: f64,
    pub window_seconds: u64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: 3_600,
            max_cost: 10_000.0,
            window_seconds: 3_600,
        }
    }
}

/// Reranker router configuration (§4.E).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerRouterConfig {
    pub default_timeout_ms: u64,
    pub default_tier: String,
    pub default_fallback_tier: Option<String>,
    pub llm_doc_char_budget: usize,
    pub llm_cost_per_token: f64,
}

impl Default for RerankerRouterConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: timeouts::RERANK_DEFAULT_MS,
            default_tier: "fast".to_string(),
            default_fallback_tier: Some("fast".to_string()),
            llm_doc_char_budget: reranker::LLM_DOC_CHAR_BUDGET,
            llm_cost_per_token: 1.0,
        }
    }
}

/// Hybrid retriever configuration (§4.G).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridConfig {
    pub prefetch_depth_floor: usize,
    pub prefetch_multiplier_with_rerank: usize,
    pub prefetch_multiplier_no_rerank: usize,
    pub rrf_k: f32,
    pub content_payload_field: String,
    pub stopword_density_threshold: f32,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            prefetch_depth_floor: retrieval::PREFETCH_DEPTH_FLOOR,
            prefetch_multiplier_with_rerank: retrieval::PREFETCH_DEPTH_MULTIPLIER_WITH_RERANK,
            prefetch_multiplier_no_rerank: retrieval::PREFETCH_DEPTH_MULTIPLIER_NO_RERANK,
            rrf_k: retrieval::RRF_K_DEFAULT,
            content_payload_field: "content".to_string(),
            stopword_density_threshold: 0.4,
        }
    }
}

/// Multi-query retriever configuration (§4.H).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiQueryConfig {
    pub num_variations: usize,
    pub strategies: Vec<String>,
    pub include_original: bool,
    pub rrf_k: f32,
    /// Cost-per-token rate used to translate LLM token usage into limiter
    /// cost units. Provider-specific; kept configurable rather than a fixed
    /// constant (see SPEC_FULL.md §9 open questions).
    pub cost_per_token: f64,
}

impl Default for MultiQueryConfig {
    fn default() -> Self {
        Self {
            num_variations: 3,
            strategies: vec!["paraphrase".to_string(), "keyword".to_string()],
            include_original: true,
            rrf_k: retrieval::RRF_K_DEFAULT,
            cost_per_token: 0.0001,
        }
    }
}

/// Session-aware retriever configuration (§4.I).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SessionRetrieverConfig {
    pub top_sessions: usize,
    pub turns_per_session: usize,
    pub final_top_k: usize,
    pub session_score_threshold: f32,
    pub parallel_turn_retrieval: bool,
}

impl Default for SessionRetrieverConfig {
    fn default() -> Self {
        Self {
            top_sessions: 5,
            turns_per_session: 3,
            final_top_k: 10,
            session_score_threshold: 0.3,
            parallel_turn_retrieval: true,
        }
    }
}

/// Semantic chunker configuration (§4.J).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkerConfig {
    pub similarity_threshold: f32,
    pub min_chunk_chars: usize,
    pub max_chunk_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.7,
            min_chunk_chars: 200,
            max_chunk_chars: 1_500,
        }
    }
}

/// Top-level, layered application settings. Loaded from a base file plus
/// an optional environment-specific override file plus `MEMSEARCH_`-prefixed
/// environment variables, the same layering pattern the teacher's
/// `Settings::new` uses via the `config` crate.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub rate_limiter: RateLimiterConfig,
    #[serde(default)]
    pub reranker_router: RerankerRouterConfig,
    #[serde(default)]
    pub hybrid: HybridConfig,
    #[serde(default)]
    pub multi_query: MultiQueryConfig,
    #[serde(default)]
    pub session_retriever: SessionRetrieverConfig,
    #[serde(default)]
    pub chunker: ChunkerConfig,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load settings from an optional base file path, layering environment
    /// variables prefixed `MEMSEARCH__` (double underscore nesting) on top.
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("MEMSEARCH")
                .separator("__")
                .try_parsing(true),
        );

        let raw = builder.build()?;
        let settings: Settings = raw.try_deserialize().unwrap_or_default();
        settings.validate()?;
        tracing::info!(config_path = ?config_path, "settings loaded");
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vector_store.dense_dim == 0 {
            return Err(ConfigError::Invalid("vector_store.dense_dim must be > 0".to_string()));
        }
        if self.multi_query.num_variations == 0 || self.multi_query.num_variations > 10 {
            return Err(ConfigError::Invalid(
                "multi_query.num_variations must be in 1..=10".to_string(),
            ));
        }
        if self.rate_limiter.window_seconds == 0 {
            return Err(ConfigError::Invalid(
                "rate_limiter.window_seconds must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for DistanceMetric {
    fn default() -> Self {
        DistanceMetric::Cosine
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_default_is_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn hybrid_config_defaults() {
        let config = HybridConfig::default();
        assert_eq!(config.rrf_k, 60.0);
        assert_eq!(config.prefetch_depth_floor, 20);
    }

    #[test]
    fn multi_query_config_defaults() {
        let config = MultiQueryConfig::default();
        assert_eq!(config.num_variations, 3);
        assert!(config.include_original);
    }

    #[test]
    fn session_retriever_config_defaults() {
        let config = SessionRetrieverConfig::default();
        assert_eq!(config.top_sessions, 5);
        assert_eq!(config.final_top_k, 10);
    }

    #[test]
    fn rejects_zero_window() {
        let mut settings = Settings::default();
        settings.rate_limiter.window_seconds = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn load_with_no_file_falls_back_to_defaults() {
        let settings = Settings::load(None).expect("defaults should validate");
        assert_eq!(settings.hybrid.rrf_k, 60.0);
    }

    #[test]
    fn load_with_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            "[hybrid]\nprefetch_depth_floor = 20\nprefetch_multiplier_with_rerank = 3\nprefetch_multiplier_no_rerank = 2\nrrf_k = 42.0\ncontent_payload_field = \"content\"\nstopword_density_threshold = 0.4\n",
        )
        .unwrap();

        let settings = Settings::load(Some(path.to_str().unwrap())).expect("file should load");
        assert_eq!(settings.hybrid.rrf_k, 42.0);
    }
}
