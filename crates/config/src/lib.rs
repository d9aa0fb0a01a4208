//! Configuration structs and centralized constants for the memsearch
//! retrieval engine.

pub mod constants;
pub mod settings;

pub use settings::{
    ChunkerConfig, ConfigError, DistanceMetric, EmbeddingConfig, HybridConfig, MultiQueryConfig,
    RateLimiterConfig, RerankerRouterConfig, SessionRetrieverConfig, Settings, VectorStoreConfig,
};
