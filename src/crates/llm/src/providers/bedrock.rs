//! Amazon Bedrock runtime client.
//!
//! Talks to the bedrock-runtime HTTP endpoint with a Bedrock API key
//! (bearer token). Bedrock has no single request shape; each model family
//! expects its own envelope; so the client builds the body per family:
//! Anthropic models get the messages envelope, Titan models the
//! `inputText` envelope.

use crate::config::ProviderSettings;
use crate::util::{status_to_error, transport_error};
use async_trait::async_trait;
use flowgraph_core::llm::{
    GenerateOptions, Generation, LanguageModel, LlmError, LlmResult, Message, Role, Usage,
};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

const ANTHROPIC_BEDROCK_VERSION: &str = "bedrock-2023-05-31";
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Bedrock runtime client.
#[derive(Clone)]
pub struct BedrockClient {
    settings: ProviderSettings,
    region: String,
    client: Client,
}

impl BedrockClient {
    pub fn new(settings: ProviderSettings, region: impl Into<String>) -> LlmResult<Self> {
        let client = Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| LlmError::Api(format!("bedrock: failed to build http client: {e}")))?;
        Ok(Self { settings, region: region.into(), client })
    }

    fn url(&self, model: &str) -> String {
        match &self.settings.base_url {
            Some(base) => format!("{}/model/{model}/invoke", base.trim_end_matches('/')),
            None => format!(
                "https://bedrock-runtime.{}.amazonaws.com/model/{model}/invoke",
                self.region
            ),
        }
    }

    /// Provider-specific request envelope for the model family.
    fn envelope(model: &str, messages: &[Message], opts: &GenerateOptions) -> Value {
        if model.contains("anthropic.") || model.starts_with("us.anthropic") {
            let mut system: Option<String> = None;
            let mut turns = Vec::new();
            for message in messages {
                match message.role {
                    Role::System => {
                        system = Some(match system.take() {
                            Some(existing) => format!("{existing}\n\n{}", message.content),
                            None => message.content.clone(),
                        })
                    }
                    Role::User => turns.push(json!({"role": "user", "content": message.content})),
                    Role::Assistant => {
                        turns.push(json!({"role": "assistant", "content": message.content}))
                    }
                }
            }
            let mut body = json!({
                "anthropic_version": ANTHROPIC_BEDROCK_VERSION,
                "max_tokens": opts.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
                "messages": turns,
            });
            if let Some(system) = system {
                body["system"] = Value::String(system);
            }
            if let Some(temperature) = opts.temperature {
                body["temperature"] = json!(temperature);
            }
            body
        } else {
            // Titan text family: a flat prompt.
            let prompt = messages
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            json!({
                "inputText": prompt,
                "textGenerationConfig": {
                    "maxTokenCount": opts.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
                    "temperature": opts.temperature.unwrap_or(0.7),
                }
            })
        }
    }

    fn parse_response(model: &str, body: &str) -> LlmResult<Generation> {
        if model.contains("anthropic.") || model.starts_with("us.anthropic") {
            let response: AnthropicEnvelopeResponse = serde_json::from_str(body)
                .map_err(|e| LlmError::InvalidResponse(format!("bedrock: {e}")))?;
            let text = response
                .content
                .iter()
                .filter_map(|block| block.text.as_deref())
                .collect::<Vec<_>>()
                .join("");
            Ok(Generation {
                text,
                usage: Usage::new(response.usage.input_tokens, response.usage.output_tokens),
            })
        } else {
            let response: TitanResponse = serde_json::from_str(body)
                .map_err(|e| LlmError::InvalidResponse(format!("bedrock: {e}")))?;
            let result = response
                .results
                .into_iter()
                .next()
                .ok_or_else(|| LlmError::InvalidResponse("bedrock: empty results".into()))?;
            Ok(Generation {
                text: result.output_text,
                usage: Usage::new(response.input_text_token_count, result.token_count),
            })
        }
    }
}

#[async_trait]
impl LanguageModel for BedrockClient {
    fn provider_name(&self) -> &str {
        "bedrock"
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
        let body = Self::envelope(&model, messages, opts);

        let response = self
            .client
            .post(self.url(&model))
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("bedrock", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(status_to_error("bedrock", status, text));
        }

        let text = response
            .text()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("bedrock: {e}")))?;
        Self::parse_response(&model, &text)
    }

    // generate_stream uses the default single-chunk fallback: the
    // invoke-with-response-stream framing is AWS event-stream binary, which
    // the run-level streaming contract does not require.
}

#[derive(Debug, Deserialize)]
struct AnthropicEnvelopeResponse {
    content: Vec<EnvelopeBlock>,
    #[serde(default)]
    usage: EnvelopeUsage,
}

#[derive(Debug, Deserialize)]
struct EnvelopeBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct EnvelopeUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TitanResponse {
    #[serde(default)]
    input_text_token_count: u64,
    results: Vec<TitanResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TitanResult {
    output_text: String,
    #[serde(default)]
    token_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anthropic_models_get_the_messages_envelope() {
        let body = BedrockClient::envelope(
            "anthropic.claude-3-haiku-20240307-v1:0",
            &[Message::system("be brief"), Message::user("hi")],
            &GenerateOptions::default().with_temperature(0.5),
        );
        assert_eq!(body["anthropic_version"], ANTHROPIC_BEDROCK_VERSION);
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["temperature"], 0.5);
    }

    #[test]
    fn titan_models_get_the_input_text_envelope() {
        let body = BedrockClient::envelope(
            "amazon.titan-text-express-v1",
            &[Message::user("hello")],
            &GenerateOptions::default(),
        );
        assert_eq!(body["inputText"], "hello");
        assert!(body["textGenerationConfig"]["maxTokenCount"].is_number());
    }

    #[test]
    fn parses_both_response_families() {
        let anthropic = r#"{
            "content": [{"type": "text", "text": "claude says hi"}],
            "usage": {"input_tokens": 9, "output_tokens": 4}
        }"#;
        let generation =
            BedrockClient::parse_response("anthropic.claude-3-haiku-20240307-v1:0", anthropic)
                .unwrap();
        assert_eq!(generation.text, "claude says hi");
        assert_eq!(generation.usage.input_tokens, 9);

        let titan = r#"{
            "inputTextTokenCount": 5,
            "results": [{"outputText": "titan says hi", "tokenCount": 3}]
        }"#;
        let generation =
            BedrockClient::parse_response("amazon.titan-text-express-v1", titan).unwrap();
        assert_eq!(generation.text, "titan says hi");
        assert_eq!(generation.usage.output_tokens, 3);
    }

    #[test]
    fn region_shapes_the_endpoint() {
        let client = BedrockClient::new(
            ProviderSettings::new("bedrock-key", "anthropic.claude-3-haiku-20240307-v1:0"),
            "ap-northeast-2",
        )
        .unwrap();
        assert_eq!(
            client.url("anthropic.claude-3-haiku-20240307-v1:0"),
            "https://bedrock-runtime.ap-northeast-2.amazonaws.com/model/anthropic.claude-3-haiku-20240307-v1:0/invoke"
        );
    }
}
