//! Google Gemini generateContent client.
//!
//! Gemini has no system role in `contents`; system messages map to the
//! `systemInstruction` field, and assistant turns use the `model` role.

use crate::config::ProviderSettings;
use crate::util::{status_to_error, transport_error};
use async_stream::try_stream;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use flowgraph_core::llm::{
    ChunkStream, GenerateOptions, Generation, LanguageModel, LlmError, LlmResult, Message, Role,
    StreamChunk, Usage,
};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini API client.
#[derive(Clone)]
pub struct GeminiClient {
    settings: ProviderSettings,
    client: Client,
}

impl GeminiClient {
    pub fn new(settings: ProviderSettings) -> LlmResult<Self> {
        let client = Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| LlmError::Api(format!("gemini: failed to build http client: {e}")))?;
        Ok(Self { settings, client })
    }

    fn url(&self, model: &str, stream: bool) -> String {
        let base = self
            .settings
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL);
        let method = if stream {
            "streamGenerateContent?alt=sse"
        } else {
            "generateContent"
        };
        format!("{}/models/{model}:{method}", base.trim_end_matches('/'))
    }

    fn request_body(messages: &[Message], opts: &GenerateOptions) -> Request {
        let mut system_parts = Vec::new();
        let mut contents = Vec::new();

        for message in messages {
            match message.role {
                Role::System => system_parts.push(Part { text: message.content.clone() }),
                Role::User => contents.push(Content {
                    role: "user".into(),
                    parts: vec![Part { text: message.content.clone() }],
                }),
                Role::Assistant => contents.push(Content {
                    role: "model".into(),
                    parts: vec![Part { text: message.content.clone() }],
                }),
            }
        }

        Request {
            contents,
            system_instruction: (!system_parts.is_empty())
                .then(|| Content { role: "user".into(), parts: system_parts }),
            generation_config: GenerationConfig {
                temperature: opts.temperature,
                max_output_tokens: opts.max_tokens,
                stop_sequences: opts.stop.clone(),
            },
        }
    }

    fn extract_text(response: &Response) -> String {
        response
            .candidates
            .first()
            .map(|candidate| {
                candidate
                    .content
                    .parts
                    .iter()
                    .map(|part| part.text.as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }

    fn extract_usage(response: &Response) -> Usage {
        response
            .usage_metadata
            .as_ref()
            .map(|usage| Usage::new(usage.prompt_token_count, usage.candidates_token_count))
            .unwrap_or_default()
    }

    async fn send(&self, model: &str, stream: bool, body: &Request) -> LlmResult<reqwest::Response> {
        let response = self
            .client
            .post(self.url(model, stream))
            .header("x-goog-api-key", &self.settings.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error("gemini", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(status_to_error("gemini", status, text));
        }
        Ok(response)
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    fn provider_name(&self) -> &str {
        "gemini"
    }

    async fn generate(
        &self,
        messages: &[Message],
        opts: &GenerateOptions,
    ) -> LlmResult<Generation> {
        let model = opts
            .model
            .clone()
            .unwrap_or_else(|| self.settings.default_model.clone());
        let body = Self::request_body(messages, opts);

        let response: Response = self
            .send(&model, false, &body)
            .await?
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("gemini: {e}")))?;

        Ok(Generation {
            text: Self::extract_text(&response),
            usage: Self::extract_usage(&response),
        })
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        opts: &GenerateOptions,
    ) -> LlmResult<ChunkStream> {
        let model = opts
            .model
            .clone()
            .unwrap_or_else(|| self.settings.default_model.clone());
        let body = Self::request_body(messages, opts);
        let response = self.send(&model, true, &body).await?;
        let mut events = response.bytes_stream().eventsource();

        let stream = try_stream! {
            let mut usage = Usage::default();
            while let Some(event) = events.next().await {
                let event = event
                    .map_err(|e| LlmError::InvalidResponse(format!("gemini stream: {e}")))?;
                let chunk: Response = serde_json::from_str(&event.data)
                    .map_err(|e| LlmError::InvalidResponse(format!("gemini stream: {e}")))?;

                let delta = Self::extract_text(&chunk);
                if chunk.usage_metadata.is_some() {
                    usage = Self::extract_usage(&chunk);
                }
                if !delta.is_empty() {
                    yield StreamChunk { delta, usage: None };
                }
            }
            yield StreamChunk { delta: String::new(), usage: Some(usage) };
        };
        Ok(Box::pin(stream))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Request {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Response {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}
