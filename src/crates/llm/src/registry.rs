//! Provider registry: one façade routing requests to configured clients.
//!
//! The registry itself implements [`LanguageModel`], so the engine holds a
//! single handle and per-node `provider` overrides pick the concrete
//! client. Instances are constructed once from settings and cached.

use crate::config::LlmSettings;
use crate::providers::anthropic::AnthropicClient;
use crate::providers::bedrock::BedrockClient;
use crate::providers::gemini::GeminiClient;
use crate::providers::openai::OpenAiClient;
use async_trait::async_trait;
use dashmap::DashMap;
use flowgraph_core::llm::{
    ChunkStream, GenerateOptions, Generation, LanguageModel, LlmError, LlmResult, Message,
};
use std::sync::Arc;
use tracing::info;

/// Registry of provider clients keyed by provider name.
pub struct ProviderRegistry {
    default_provider: String,
    clients: DashMap<String, Arc<dyn LanguageModel>>,
}

impl ProviderRegistry {
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            default_provider: default_provider.into(),
            clients: DashMap::new(),
        }
    }

    /// Build a registry from settings, constructing every configured
    /// provider. Fails when the default provider has no configuration.
    pub fn from_settings(settings: &LlmSettings) -> LlmResult<Self> {
        let registry = Self::new(settings.default_provider.clone());

        if let Some(openai) = &settings.openai {
            registry.register("openai", Arc::new(OpenAiClient::new(openai.clone())?));
        }
        if let Some(anthropic) = &settings.anthropic {
            registry.register("anthropic", Arc::new(AnthropicClient::new(anthropic.clone())?));
        }
        if let Some(bedrock) = &settings.bedrock {
            registry.register(
                "bedrock",
                Arc::new(BedrockClient::new(bedrock.clone(), settings.bedrock_region.clone())?),
            );
        }
        if let Some(gemini) = &settings.gemini {
            registry.register("gemini", Arc::new(GeminiClient::new(gemini.clone())?));
        }

        if !registry.clients.contains_key(&registry.default_provider) {
            return Err(LlmError::Api(format!(
                "default provider '{}' is not configured",
                registry.default_provider
            )));
        }
        Ok(registry)
    }

    /// Register (or replace) a provider client.
    pub fn register(&self, name: impl Into<String>, client: Arc<dyn LanguageModel>) {
        let name = name.into();
        info!(provider = %name, "registered LLM provider");
        self.clients.insert(name, client);
    }

    pub fn providers(&self) -> Vec<String> {
        self.clients.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Resolve the client for an explicit provider, or the default.
    pub fn client(&self, provider: Option<&str>) -> LlmResult<Arc<dyn LanguageModel>> {
        let name = provider.unwrap_or(&self.default_provider);
        self.clients
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| LlmError::Api(format!("unsupported LLM provider '{name}'")))
    }
}

#[async_trait]
impl LanguageModel for ProviderRegistry {
    fn provider_name(&self) -> &str {
        &self.default_provider
    }

    async fn generate(
        &self,
        messages: &[Message],
        opts: &GenerateOptions,
    ) -> LlmResult<Generation> {
        let client = self.client(opts.provider.as_deref())?;
        client.generate(messages, opts).await
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        opts: &GenerateOptions,
    ) -> LlmResult<ChunkStream> {
        let client = self.client(opts.provider.as_deref())?;
        client.generate_stream(messages, opts).await
    }
}
