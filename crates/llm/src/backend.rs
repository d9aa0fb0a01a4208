//! Chat-completion backend trait plus Ollama and OpenAI-compatible
//! implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use crate::LlmError;

/// Chat message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    Error,
}

/// Per-call generation parameters.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Request JSON-mode output when the provider supports it.
    pub json_mode: bool,
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            temperature: 0.0,
            max_tokens: 1024,
            json_mode: false,
            timeout_ms: 60_000,
        }
    }
}

/// Result of a single generation call.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub text: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub finish_reason: FinishReason,
}

impl GenerationResult {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Uniform contract over chat-completion providers.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn generate(
        &self,
        messages: &[Message],
        config: &LlmConfig,
    ) -> Result<GenerationResult, LlmError>;

    /// Grapheme-based token estimate, used when a provider does not report
    /// usage counters up front (e.g. pre-flight cost estimation).
    fn estimate_tokens(&self, text: &str) -> u32 {
        (text.graphemes(true).count() as u32 / 4).max(1)
    }
}

/// Ollama backend: local inference server with an OpenAI-ish chat endpoint.
pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [OllamaMessage],
    stream: bool,
    format: Option<&'a str>,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaResponseMessage,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
}

#[derive(Deserialize)]
struct OllamaResponseMessage {
    content: String,
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    async fn generate(
        &self,
        messages: &[Message],
        config: &LlmConfig,
    ) -> Result<GenerationResult, LlmError> {
        let request = OllamaChatRequest {
            model: &config.model,
            messages: &messages
                .iter()
                .map(|m| OllamaMessage {
                    role: role_str(m.role),
                    content: m.content.clone(),
                })
                .collect::<Vec<_>>(),
            stream: false,
            format: config.json_mode.then_some("json"),
            options: OllamaOptions {
                temperature: config.temperature,
                num_predict: config.max_tokens,
            },
        };

        tracing::debug!(model = %config.model, base_url = %self.base_url, "sending ollama chat request");

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .send()
            .await?;

        if !response.status().is_success() {
            tracing::error!(status = %response.status(), "ollama request failed");
            return Err(LlmError::Api(format!(
                "ollama returned status {}",
                response.status()
            )));
        }

        let body: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        Ok(GenerationResult {
            text: body.message.content,
            prompt_tokens: body.prompt_eval_count,
            completion_tokens: body.eval_count,
            finish_reason: FinishReason::Stop,
        })
    }
}

/// Configuration for an OpenAI-compatible endpoint (OpenAI, Azure, local
/// vLLM servers that implement the same chat-completions shape).
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: String,
}

pub struct OpenAiBackend {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiBackend {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[derive(Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<OpenAiResponseFormat>,
}

#[derive(Serialize)]
struct OpenAiResponseFormat {
    r#type: &'static str,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
    usage: OpenAiUsage,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OllamaResponseMessage,
    finish_reason: String,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    async fn generate(
        &self,
        messages: &[Message],
        config: &LlmConfig,
    ) -> Result<GenerationResult, LlmError> {
        let request = OpenAiChatRequest {
            model: &config.model,
            messages: messages
                .iter()
                .map(|m| OllamaMessage {
                    role: role_str(m.role),
                    content: m.content.clone(),
                })
                .collect(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            response_format: config
                .json_mode
                .then_some(OpenAiResponseFormat { r#type: "json_object" }),
        };

        tracing::debug!(model = %config.model, base_url = %self.config.base_url, "sending openai-compatible chat request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .send()
            .await?;

        if !response.status().is_success() {
            tracing::error!(status = %response.status(), "openai-compatible request failed");
            return Err(LlmError::Api(format!(
                "openai-compatible endpoint returned status {}",
                response.status()
            )));
        }

        let body: OpenAiChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("empty choices array".to_string()))?;

        let finish_reason = match choice.finish_reason.as_str() {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            _ => FinishReason::Error,
        };

        Ok(GenerationResult {
            text: choice.message.content,
            prompt_tokens: body.usage.prompt_tokens,
            completion_tokens: body.usage.completion_tokens,
            finish_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubBackend;

    #[async_trait]
    impl LlmBackend for StubBackend {
        async fn generate(
            &self,
            _messages: &[Message],
            _config: &LlmConfig,
        ) -> Result<GenerationResult, LlmError> {
            Ok(GenerationResult {
                text: "{\"queries\": [\"a\", \"b\"]}".to_string(),
                prompt_tokens: 10,
                completion_tokens: 5,
                finish_reason: FinishReason::Stop,
            })
        }
    }

    #[tokio::test]
    async fn stub_backend_round_trips() {
        let backend = StubBackend;
        let result = backend
            .generate(&[Message::user("hi")], &LlmConfig::default())
            .await
            .unwrap();
        assert_eq!(result.total_tokens(), 15);
    }

    #[test]
    fn estimate_tokens_is_never_zero_for_nonempty_text() {
        let backend = StubBackend;
        assert!(backend.estimate_tokens("hi") >= 1);
        assert!(backend.estimate_tokens("a reasonably long sentence of text") > 1);
    }

    #[test]
    fn message_constructors_set_role() {
        let m = Message::system("sys");
        assert_eq!(m.role, Role::System);
        let m = Message::user("usr");
        assert_eq!(m.role, Role::User);
    }
}
