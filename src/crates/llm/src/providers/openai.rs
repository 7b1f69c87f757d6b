//! OpenAI chat-completions client.

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

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI API client.
#[derive(Clone)]
pub struct OpenAiClient {
    settings: ProviderSettings,
    client: Client,
}

impl OpenAiClient {
    pub fn new(settings: ProviderSettings) -> LlmResult<Self> {
        let client = Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| LlmError::Api(format!("openai: failed to build http client: {e}")))?;
        Ok(Self { settings, client })
    }

    fn url(&self) -> String {
        let base = self
            .settings
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL);
        format!("{}/chat/completions", base.trim_end_matches('/'))
    }

    fn request_body(&self, messages: &[Message], opts: &GenerateOptions, stream: bool) -> Request {
        Request {
            model: opts
                .model
                .clone()
                .unwrap_or_else(|| self.settings.default_model.clone()),
            messages: messages.iter().map(convert_message).collect(),
            temperature: opts.temperature,
            max_tokens: opts.max_tokens,
            stop: opts.stop.clone(),
            stream,
            stream_options: stream.then(|| StreamOptions { include_usage: true }),
        }
    }

    async fn send(&self, body: &Request) -> LlmResult<reqwest::Response> {
        let response = self
            .client
            .post(self.url())
            .bearer_auth(&self.settings.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error("openai", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(status_to_error("openai", status, text));
        }
        Ok(response)
    }
}

fn convert_message(message: &Message) -> WireMessage {
    WireMessage {
        role: match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
        .to_string(),
        content: message.content.clone(),
    }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    fn provider_name(&self) -> &str {
        "openai"
    }

    async fn generate(
        &self,
        messages: &[Message],
        opts: &GenerateOptions,
    ) -> LlmResult<Generation> {
        let body = self.request_body(messages, opts, false);
        let response: Response = self
            .send(&body)
            .await?
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("openai: {e}")))?;

        let text = response
            .choices
            .first()
            .and_then(|c| c.message.as_ref())
            .map(|m| m.content.clone())
            .ok_or_else(|| LlmError::InvalidResponse("openai: response has no choices".into()))?;

        Ok(Generation {
            text,
            usage: response.usage.map(Into::into).unwrap_or_default(),
        })
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        opts: &GenerateOptions,
    ) -> LlmResult<ChunkStream> {
        let body = self.request_body(messages, opts, true);
        let response = self.send(&body).await?;
        let mut events = response.bytes_stream().eventsource();

        let stream = try_stream! {
            while let Some(event) = events.next().await {
                let event = event
                    .map_err(|e| LlmError::InvalidResponse(format!("openai stream: {e}")))?;
                if event.data == "[DONE]" {
                    break;
                }
                let chunk: StreamResponse = serde_json::from_str(&event.data)
                    .map_err(|e| LlmError::InvalidResponse(format!("openai stream: {e}")))?;

                let delta = chunk
                    .choices
                    .first()
                    .and_then(|c| c.delta.as_ref())
                    .and_then(|d| d.content.clone())
                    .unwrap_or_default();
                let usage = chunk.usage.map(Into::into);
                if !delta.is_empty() || usage.is_some() {
                    yield StreamChunk { delta, usage };
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

#[derive(Debug, Serialize)]
struct Request {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct Response {
    choices: Vec<Choice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ResponseMessage>,
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

type StreamResponse = Response;

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl From<WireUsage> for Usage {
    fn from(usage: WireUsage) -> Self {
        Usage::new(usage.prompt_tokens, usage.completion_tokens)
    }
}
