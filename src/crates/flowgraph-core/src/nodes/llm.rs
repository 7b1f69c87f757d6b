//! LLM node: renders a prompt template and calls the language model.

use crate::llm::{GenerateOptions, LlmError, Message, Usage};
use crate::node::{NodeContext, NodeExecutionResult, NodeHandler, NodeSchema};
use crate::schema::{canonical_json, NodeDef, NodeKind, Port, PortType, Ports};
use crate::services::CacheMeta;
use crate::template::TemplateRenderer;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

const DEFAULT_TEMPERATURE: f64 = 0.7;
const DEFAULT_MAX_TOKENS: u32 = 1000;

/// Calls the configured model with a rendered prompt; streams tokens to the
/// caller when a sink is attached. Semantic-cache lookup and rate-limit
/// acquisition happen before dispatch; a cache hit consumes no bucket slot
/// and no tokens.
pub struct LlmNode {
    id: String,
    provider: Option<String>,
    model: String,
    prompt_template: String,
    system_prompt: Option<String>,
    temperature: f64,
    max_tokens: u32,
    allow_context_fallback: bool,
}

impl LlmNode {
    pub fn from_def(def: &NodeDef) -> Result<Box<dyn NodeHandler>, String> {
        let model = def
            .config_str("model")
            .unwrap_or("gpt-4o-mini")
            .to_string();
        let prompt_template = def
            .config_str("prompt_template")
            .unwrap_or_default()
            .to_string();

        Ok(Box::new(LlmNode {
            id: def.id.clone(),
            provider: def.config_str("provider").map(str::to_string),
            model,
            prompt_template,
            system_prompt: def.config_str("system_prompt").map(str::to_string),
            temperature: def
                .config
                .get("temperature")
                .and_then(Value::as_f64)
                .unwrap_or(DEFAULT_TEMPERATURE),
            max_tokens: def
                .config
                .get("max_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(DEFAULT_MAX_TOKENS as u64) as u32,
            allow_context_fallback: def
                .config
                .get("allow_conversation_context_fallback")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }))
    }

    pub fn schema() -> NodeSchema {
        NodeSchema {
            kind: NodeKind::Llm,
            label: "LLM",
            icon: "sparkles",
            max_instances: -1,
            configurable: true,
            inputs: vec![
                Port::new("query", PortType::String),
                Port::new("context", PortType::Any),
            ],
            outputs: vec![Port::new("response", PortType::String)],
        }
    }

    fn cache_meta(&self, provider: &str, context: Option<&Value>) -> CacheMeta {
        CacheMeta {
            provider: provider.to_string(),
            model: self.model.clone(),
            system_prompt_hash: sha256_hex(self.system_prompt.as_deref().unwrap_or("")),
            temperature_bucket: (self.temperature * 100.0).round() as i64,
            max_tokens_bucket: self.max_tokens as i64,
            context_hash: context
                .filter(|v| !v.is_null())
                .map(|v| sha256_hex(&canonical_json(v))),
        }
    }

    fn options(&self) -> GenerateOptions {
        GenerateOptions {
            model: Some(self.model.clone()),
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            stop: None,
            provider: self.provider.clone(),
        }
    }
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn failure_from_llm(err: &LlmError) -> NodeExecutionResult {
    NodeExecutionResult::failure(err.code(), err.to_string())
}

#[async_trait]
impl NodeHandler for LlmNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Llm
    }

    fn schema(&self) -> NodeSchema {
        Self::schema()
    }

    /// `context` stops being required when the node opts into the
    /// conversation-context fallback; an unmapped context then resolves to
    /// `Null` instead of failing input assembly.
    fn instance_ports(&self) -> Ports {
        let mut ports = Self::schema().ports();
        if self.allow_context_fallback {
            for port in &mut ports.inputs {
                if port.name == "context" {
                    port.required = false;
                }
            }
        }
        ports
    }

    fn validate_static(&self) -> Result<(), String> {
        if self.prompt_template.trim().is_empty() {
            return Err("llm prompt_template is empty".into());
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(format!("temperature {} out of range", self.temperature));
        }
        TemplateRenderer::parse_template(&self.prompt_template)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    async fn execute(
        &self,
        ctx: &mut NodeContext<'_>,
        inputs: &Map<String, Value>,
    ) -> NodeExecutionResult {
        let Some(model) = ctx.services.llm.clone() else {
            return NodeExecutionResult::failure(
                "configuration_error",
                "no LLM client configured",
            );
        };

        let prompt = match ctx.render(&self.prompt_template, &self.id, inputs) {
            Ok(text) => text,
            Err(e) => {
                return NodeExecutionResult::failure("template_render_failed", e.to_string())
            }
        };

        let mut messages = Vec::new();
        if let Some(system) = &self.system_prompt {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(prompt.clone()));

        let provider = self
            .provider
            .as_deref()
            .unwrap_or_else(|| model.provider_name());
        let meta = self.cache_meta(provider, inputs.get("context"));

        // Semantic cache: a hit returns the cached string without consuming
        // a token-bucket slot; the cached text replays as one chunk.
        if let Some(cache) = &ctx.services.response_cache {
            if let Some(cached) = cache.lookup(&prompt, &meta).await {
                debug!(node = %self.id, "semantic cache hit");
                if let Some(sink) = ctx.sink {
                    sink.emit_chunk(cached.clone()).await;
                }
                ctx.streamed.insert(format!("{}.response", self.id));

                let mut outputs = Map::new();
                outputs.insert("response".into(), Value::String(cached));
                let mut process_data = Map::new();
                process_data.insert("cache_hit".into(), Value::Bool(true));
                return NodeExecutionResult::success(outputs)
                    .with_usage(Usage::default())
                    .with_process_data(process_data);
            }
        }

        if let Some(bucket) = &ctx.services.llm_rate_limiter {
            bucket.acquire(1.0).await;
        }

        let opts = self.options();
        let (text, usage) = if let Some(sink) = ctx.sink {
            let mut stream = match model.generate_stream(&messages, &opts).await {
                Ok(stream) => stream,
                Err(e) => return failure_from_llm(&e),
            };

            let mut text = String::new();
            let mut usage = Usage::default();
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(chunk) => {
                        if !chunk.delta.is_empty() {
                            sink.emit_chunk(chunk.delta.clone()).await;
                            text.push_str(&chunk.delta);
                        }
                        if let Some(chunk_usage) = chunk.usage {
                            usage = chunk_usage;
                        }
                    }
                    Err(e) => return failure_from_llm(&e),
                }
            }
            ctx.streamed.insert(format!("{}.response", self.id));
            (text, usage)
        } else {
            match model.generate(&messages, &opts).await {
                Ok(generation) => (generation.text, generation.usage),
                Err(e) => return failure_from_llm(&e),
            }
        };

        if let Some(cache) = &ctx.services.response_cache {
            cache.store(&prompt, &text, &meta).await;
        }

        let mut outputs = Map::new();
        outputs.insert("response".into(), Value::String(text));
        NodeExecutionResult::success(outputs).with_usage(usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeStatus;
    use crate::pool::VariablePool;
    use crate::services::ResponseCache;
    use crate::stream::{StreamFrame, StreamSink};
    use crate::testing::{bare_services, test_run_info, StaticModel};
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn llm_node() -> LlmNode {
        LlmNode {
            id: "llm-1".into(),
            provider: Some("openai".into()),
            model: "gpt-4o-mini".into(),
            prompt_template: "Q: {{ self.query }}\nC: {{ self.context }}".into(),
            system_prompt: None,
            temperature: 0.2,
            max_tokens: 400,
            allow_context_fallback: false,
        }
    }

    fn inputs() -> Map<String, Value> {
        serde_json::from_value(serde_json::json!({
            "query": "what is python",
            "context": "Python is a language."
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn generates_and_reports_usage() {
        let node = llm_node();
        let model = StaticModel::new("Python is a high-level language.");
        let services = bare_services().with_llm(model.clone());
        let run = test_run_info();
        let mut pool = VariablePool::new();
        let mut streamed = HashSet::new();
        let mut conv_writes = Vec::new();

        let mut ctx = NodeContext {
            run: &run,
            pool: &mut pool,
            services: &services,
            sink: None,
            streamed: &mut streamed,
            conv_writes: &mut conv_writes,
        };

        let result = node.execute(&mut ctx, &inputs()).await;
        assert_eq!(result.status, NodeStatus::Completed);
        assert_eq!(
            result.outputs["response"],
            Value::String("Python is a high-level language.".into())
        );
        assert!(result.usage.unwrap().input_tokens > 0);
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn streams_tokens_to_sink() {
        let node = llm_node();
        let model = StaticModel::new("one two three");
        let services = bare_services().with_llm(model);
        let run = test_run_info();
        let mut pool = VariablePool::new();
        let (sink, mut rx) = StreamSink::channel(16);
        let mut streamed = HashSet::new();
        let mut conv_writes = Vec::new();

        let mut ctx = NodeContext {
            run: &run,
            pool: &mut pool,
            services: &services,
            sink: Some(&sink),
            streamed: &mut streamed,
            conv_writes: &mut conv_writes,
        };

        let result = node.execute(&mut ctx, &inputs()).await;
        assert_eq!(result.status, NodeStatus::Completed);
        assert!(streamed.contains("llm-1.response"));

        drop(sink);
        let mut collected = String::new();
        while let Some(StreamFrame::Chunk { text }) = rx.recv().await {
            collected.push_str(&text);
        }
        assert_eq!(collected, "one two three");
    }

    struct RecordingCache {
        hit: Option<String>,
        stored: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ResponseCache for RecordingCache {
        async fn lookup(&self, _prompt: &str, _meta: &CacheMeta) -> Option<String> {
            self.hit.clone()
        }

        async fn store(&self, prompt: &str, response: &str, _meta: &CacheMeta) {
            self.stored.lock().push((prompt.into(), response.into()));
        }
    }

    #[tokio::test]
    async fn cache_hit_skips_the_model() {
        let node = llm_node();
        let model = StaticModel::new("should not be called");
        let cache = Arc::new(RecordingCache {
            hit: Some("cached answer".into()),
            stored: Mutex::new(Vec::new()),
        });
        let services = bare_services()
            .with_llm(model.clone())
            .with_response_cache(cache);
        let run = test_run_info();
        let mut pool = VariablePool::new();
        let mut streamed = HashSet::new();
        let mut conv_writes = Vec::new();

        let mut ctx = NodeContext {
            run: &run,
            pool: &mut pool,
            services: &services,
            sink: None,
            streamed: &mut streamed,
            conv_writes: &mut conv_writes,
        };

        let result = node.execute(&mut ctx, &inputs()).await;
        assert_eq!(result.outputs["response"], Value::String("cached answer".into()));
        assert_eq!(result.usage.unwrap(), Usage::default());
        assert_eq!(result.process_data["cache_hit"], Value::Bool(true));
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn miss_stores_the_response() {
        let node = llm_node();
        let model = StaticModel::new("fresh answer");
        let cache = Arc::new(RecordingCache {
            hit: None,
            stored: Mutex::new(Vec::new()),
        });
        let services = bare_services()
            .with_llm(model)
            .with_response_cache(cache.clone());
        let run = test_run_info();
        let mut pool = VariablePool::new();
        let mut streamed = HashSet::new();
        let mut conv_writes = Vec::new();

        let mut ctx = NodeContext {
            run: &run,
            pool: &mut pool,
            services: &services,
            sink: None,
            streamed: &mut streamed,
            conv_writes: &mut conv_writes,
        };

        node.execute(&mut ctx, &inputs()).await;
        let stored = cache.stored.lock();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].1, "fresh answer");
    }

    #[test]
    fn cache_meta_buckets_temperature() {
        let node = llm_node();
        let meta = node.cache_meta("openai", None);
        assert_eq!(meta.temperature_bucket, 20);
        assert_eq!(meta.max_tokens_bucket, 400);
        assert!(meta.context_hash.is_none());

        let with_context = node.cache_meta("openai", Some(&Value::String("ctx".into())));
        assert!(with_context.context_hash.is_some());
    }

    #[test]
    fn static_validation_rejects_empty_prompt() {
        let mut node = llm_node();
        node.prompt_template = String::new();
        assert!(node.validate_static().is_err());
    }

    #[test]
    fn context_fallback_makes_context_optional() {
        let def: NodeDef = serde_json::from_value(serde_json::json!({
            "id": "llm-1",
            "type": "llm",
            "data": {
                "type": "llm",
                "model": "gpt-4o-mini",
                "prompt_template": "{{ self.query }}",
                "allow_conversation_context_fallback": true
            }
        }))
        .unwrap();
        let handler = LlmNode::from_def(&def).unwrap();
        let ports = handler.instance_ports();
        assert!(!ports.input("context").unwrap().required);
        assert!(ports.input("query").unwrap().required);

        // Without the flag the port stays required.
        let strict = llm_node();
        assert!(strict.instance_ports().input("context").unwrap().required);
    }
}
