//! LLM chat-completion client.
//!
//! Used by the retrieval engine for two purposes: query-expansion
//! (structured JSON output) and listwise reranking at the `llm` tier.

pub mod backend;

pub use backend::{
    FinishReason, GenerationResult, LlmBackend, LlmConfig, Message, OllamaBackend, OpenAiBackend,
    OpenAiConfig, Role,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("generation error: {0}")]
    Generation(String),

    #[error("api error: {0}")]
    Api(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("timeout")]
    Timeout,
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::Network(err.to_string())
    }
}

impl From<LlmError> for memsearch_core::Error {
    fn from(err: LlmError) -> Self {
        memsearch_core::Error::Unavailable(err.to_string())
    }
}
