//! Anthropic messages-API client.
//!
//! Anthropic separates the system prompt from the conversation: system
//! messages are concatenated into the `system` parameter and only
//! user/assistant turns go into `messages`.

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

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Anthropic API client.
#[derive(Clone)]
pub struct AnthropicClient {
    settings: ProviderSettings,
    client: Client,
}

impl AnthropicClient {
    pub fn new(settings: ProviderSettings) -> LlmResult<Self> {
        let client = Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| LlmError::Api(format!("anthropic: failed to build http client: {e}")))?;
        Ok(Self { settings, client })
    }

    fn url(&self) -> String {
        let base = self
            .settings
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL);
        format!("{}/v1/messages", base.trim_end_matches('/'))
    }

    /// Split system messages out and keep the conversational turns.
    fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<WireMessage>) {
        let mut system: Option<String> = None;
        let mut turns = Vec::new();

        for message in messages {
            match message.role {
                Role::System => {
                    system = Some(match system {
                        Some(existing) => format!("{existing}\n\n{}", message.content),
                        None => message.content.clone(),
                    });
                }
                Role::User => turns.push(WireMessage {
                    role: "user".into(),
                    content: message.content.clone(),
                }),
                Role::Assistant => turns.push(WireMessage {
                    role: "assistant".into(),
                    content: message.content.clone(),
                }),
            }
        }
        (system, turns)
    }

    fn request_body(&self, messages: &[Message], opts: &GenerateOptions, stream: bool) -> Request {
        let (system, turns) = Self::convert_messages(messages);
        Request {
            model: opts
                .model
                .clone()
                .unwrap_or_else(|| self.settings.default_model.clone()),
            system,
            messages: turns,
            temperature: opts.temperature,
            max_tokens: opts.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            stop_sequences: opts.stop.clone(),
            stream,
        }
    }

    async fn send(&self, body: &Request) -> LlmResult<reqwest::Response> {
        let response = self
            .client
            .post(self.url())
            .header("x-api-key", &self.settings.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error("anthropic", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(status_to_error("anthropic", status, text));
        }
        Ok(response)
    }
}

#[async_trait]
impl LanguageModel for AnthropicClient {
    fn provider_name(&self) -> &str {
        "anthropic"
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
            .map_err(|e| LlmError::InvalidResponse(format!("anthropic: {e}")))?;

        let text = response
            .content
            .iter()
            .filter(|block| block.block_type == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        Ok(Generation {
            text,
            usage: Usage::new(response.usage.input_tokens, response.usage.output_tokens),
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
            let mut usage = Usage::default();
            while let Some(event) = events.next().await {
                let event = event
                    .map_err(|e| LlmError::InvalidResponse(format!("anthropic stream: {e}")))?;
                let payload: StreamEvent = serde_json::from_str(&event.data)
                    .map_err(|e| LlmError::InvalidResponse(format!("anthropic stream: {e}")))?;

                match payload.event_type.as_str() {
                    "message_start" => {
                        if let Some(message) = payload.message {
                            usage.input_tokens = message.usage.input_tokens;
                        }
                    }
                    "content_block_delta" => {
                        if let Some(delta) = payload.delta.and_then(|d| d.text) {
                            if !delta.is_empty() {
                                yield StreamChunk { delta, usage: None };
                            }
                        }
                    }
                    "message_delta" => {
                        if let Some(delta_usage) = payload.usage {
                            usage.output_tokens = delta_usage.output_tokens;
                        }
                    }
                    "message_stop" => {
                        yield StreamChunk { delta: String::new(), usage: Some(usage) };
                        break;
                    }
                    _ => {}
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

#[derive(Debug, Serialize)]
struct Request {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct Response {
    content: Vec<ContentBlock>,
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    message: Option<StreamMessage>,
    #[serde(default)]
    delta: Option<StreamDelta>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamMessage {
    #[serde(default)]
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_messages_are_separated_and_combined() {
        let messages = vec![
            Message::system("You are terse."),
            Message::system("Answer in Korean."),
            Message::user("hello"),
            Message::assistant("안녕하세요"),
            Message::user("what is rust"),
        ];
        let (system, turns) = AnthropicClient::convert_messages(&messages);
        assert_eq!(system.as_deref(), Some("You are terse.\n\nAnswer in Korean."));
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].role, "user");
        assert_eq!(turns[1].role, "assistant");
    }

    #[test]
    fn request_defaults_max_tokens() {
        let client =
            AnthropicClient::new(ProviderSettings::new("sk-ant", "claude-sonnet-4-5-20250929"))
                .unwrap();
        let body = client.request_body(&[Message::user("hi")], &GenerateOptions::default(), false);
        assert_eq!(body.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(body.model, "claude-sonnet-4-5-20250929");
    }

    #[test]
    fn parses_text_blocks() {
        let raw = r#"{
            "content": [
                {"type": "text", "text": "first "},
                {"type": "tool_use", "id": "t1"},
                {"type": "text", "text": "second"}
            ],
            "usage": {"input_tokens": 10, "output_tokens": 4}
        }"#;
        let response: Response = serde_json::from_str(raw).unwrap();
        let text: String = response
            .content
            .iter()
            .filter(|b| b.block_type == "text")
            .filter_map(|b| b.text.as_deref())
            .collect();
        assert_eq!(text, "first second");
        assert_eq!(response.usage.input_tokens, 10);
    }

    #[test]
    fn parses_stream_events() {
        let delta: StreamEvent = serde_json::from_str(
            r#"{"type": "content_block_delta", "delta": {"type": "text_delta", "text": "tok"}}"#,
        )
        .unwrap();
        assert_eq!(delta.event_type, "content_block_delta");
        assert_eq!(delta.delta.unwrap().text.as_deref(), Some("tok"));

        let stop: StreamEvent = serde_json::from_str(r#"{"type": "message_stop"}"#).unwrap();
        assert_eq!(stop.event_type, "message_stop");
    }
}
