//! Provider-agnostic LLM contract.
//!
//! The engine is an orchestrator, not an LLM client library: this module
//! defines the message shapes, the [`LanguageModel`] trait, and the uniform
//! error taxonomy. Concrete providers live in the `llm` crate and map their
//! wire errors into [`LlmError`] so every caller sees the same kinds.

use async_trait::async_trait;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use thiserror::Error;

/// Role of a chat message, OpenAI-shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Per-call generation options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateOptions {
    /// Model id; falls back to the provider's default when empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    /// Explicit provider override (`openai`, `anthropic`, `bedrock`, `gemini`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl GenerateOptions {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Token accounting attached to node executions and summed into the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self { input_tokens, output_tokens, cache_tokens: 0 }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn accumulate(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_tokens += other.cache_tokens;
    }
}

/// A complete (non-streaming) generation.
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub usage: Usage,
}

/// One streamed delta. Usage arrives on the final chunk when the provider
/// reports it.
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    pub delta: String,
    pub usage: Option<Usage>,
}

/// Boxed stream of generation chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = LlmResult<StreamChunk>> + Send>>;

pub type LlmResult<T> = std::result::Result<T, LlmError>;

/// Uniform LLM error taxonomy, produced identically by every provider.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    /// Provider rate limit; retryable with backoff
    #[error("LLM rate limited: {0}")]
    RateLimit(String),

    /// Request timed out; retryable once
    #[error("LLM request timed out: {0}")]
    Timeout(String),

    /// Provider returned a response the client could not use
    #[error("invalid LLM response: {0}")]
    InvalidResponse(String),

    /// Authentication failed; fatal for the run
    #[error("LLM authentication failed: {0}")]
    Auth(String),

    /// Catch-all provider error
    #[error("LLM API error: {0}")]
    Api(String),
}

impl LlmError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            LlmError::RateLimit(_) => "llm_rate_limit",
            LlmError::Timeout(_) => "llm_timeout",
            LlmError::InvalidResponse(_) => "llm_invalid_response",
            LlmError::Auth(_) => "llm_auth",
            LlmError::Api(_) => "llm_api_error",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::RateLimit(_) | LlmError::Timeout(_))
    }
}

/// The `generate` / `generate_stream` contract every provider implements.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Provider identifier (`openai`, `anthropic`, ...).
    fn provider_name(&self) -> &str;

    /// One-shot generation.
    async fn generate(&self, messages: &[Message], opts: &GenerateOptions)
        -> LlmResult<Generation>;

    /// Streaming generation. The default implementation degrades to a
    /// single-chunk stream over `generate`.
    async fn generate_stream(
        &self,
        messages: &[Message],
        opts: &GenerateOptions,
    ) -> LlmResult<ChunkStream> {
        let generation = self.generate(messages, opts).await?;
        let chunk = StreamChunk {
            delta: generation.text,
            usage: Some(generation.usage),
        };
        Ok(Box::pin(futures::stream::iter([Ok(chunk)])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    struct Fixed;

    #[async_trait]
    impl LanguageModel for Fixed {
        fn provider_name(&self) -> &str {
            "fixed"
        }

        async fn generate(
            &self,
            _messages: &[Message],
            _opts: &GenerateOptions,
        ) -> LlmResult<Generation> {
            Ok(Generation {
                text: "ok".into(),
                usage: Usage::new(3, 1),
            })
        }
    }

    #[tokio::test]
    async fn default_stream_degrades_to_single_chunk() {
        let model = Fixed;
        let mut stream = model
            .generate_stream(&[Message::user("hi")], &GenerateOptions::default())
            .await
            .unwrap();

        let chunk = stream.next().await.unwrap().unwrap();
        assert_eq!(chunk.delta, "ok");
        assert_eq!(chunk.usage.unwrap().total(), 4);
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn usage_accumulates() {
        let mut total = Usage::default();
        total.accumulate(&Usage::new(10, 5));
        total.accumulate(&Usage::new(1, 2));
        assert_eq!(total.input_tokens, 11);
        assert_eq!(total.output_tokens, 7);
        assert_eq!(total.total(), 18);
    }

    #[test]
    fn error_codes() {
        assert_eq!(LlmError::RateLimit("x".into()).code(), "llm_rate_limit");
        assert_eq!(LlmError::Timeout("x".into()).code(), "llm_timeout");
        assert_eq!(LlmError::Auth("x".into()).code(), "llm_auth");
        assert!(LlmError::RateLimit("x".into()).is_retryable());
        assert!(!LlmError::InvalidResponse("x".into()).is_retryable());
    }
}
