//! LLM provider implementations for flowgraph.
//!
//! Concrete [`LanguageModel`](flowgraph_core::llm::LanguageModel)
//! implementations for the supported cloud providers, plus the registry
//! that routes a request to the right one:
//!
//! - **OpenAI**: chat completions, SSE streaming
//! - **Anthropic**: messages API; the system prompt travels separately
//! - **Bedrock**: invoke-model with per-family request envelopes
//! - **Gemini**: generateContent with SSE streaming
//!
//! Every provider maps its wire errors into the uniform
//! [`LlmError`](flowgraph_core::llm::LlmError) taxonomy, so callers never
//! see provider-specific failure shapes.

pub mod config;
pub mod providers;
pub mod registry;
mod util;

pub use config::{LlmSettings, ProviderSettings};
pub use providers::anthropic::AnthropicClient;
pub use providers::bedrock::BedrockClient;
pub use providers::gemini::GeminiClient;
pub use providers::openai::OpenAiClient;
pub use registry::ProviderRegistry;
