//! Tavily-search node: web search through the injected search service.

use crate::node::{NodeContext, NodeExecutionResult, NodeHandler, NodeSchema};
use crate::schema::{NodeDef, NodeKind, Port, PortType};
use crate::services::{WebSearchError, WebSearchParams};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

/// Runs a web search and emits the result texts as `context` plus the
/// structured `results` array and the optional provider `answer`.
pub struct TavilySearchNode {
    id: String,
    params: WebSearchParams,
}

impl TavilySearchNode {
    pub fn from_def(def: &NodeDef) -> Result<Box<dyn NodeHandler>, String> {
        let string_list = |key: &str| -> Vec<String> {
            def.config
                .get(key)
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        };

        let params = WebSearchParams {
            topic: def.config_str("topic").unwrap_or("general").to_string(),
            search_depth: def
                .config_str("search_depth")
                .unwrap_or("basic")
                .to_string(),
            max_results: def
                .config
                .get("max_results")
                .and_then(Value::as_u64)
                .unwrap_or(5)
                .clamp(1, 20) as usize,
            include_domains: string_list("include_domains"),
            exclude_domains: string_list("exclude_domains"),
            time_range: def.config_str("time_range").map(str::to_string),
        };

        Ok(Box::new(TavilySearchNode { id: def.id.clone(), params }))
    }

    pub fn schema() -> NodeSchema {
        NodeSchema {
            kind: NodeKind::TavilySearch,
            label: "Tavily Search",
            icon: "globe",
            max_instances: -1,
            configurable: true,
            inputs: vec![Port::new("query", PortType::String)],
            outputs: vec![
                Port::new("context", PortType::String),
                Port::new("results", PortType::Array),
                Port::new("answer", PortType::String).optional(),
            ],
        }
    }
}

fn error_code(err: &WebSearchError) -> &'static str {
    match err {
        WebSearchError::Auth(_) => "web_search_auth",
        WebSearchError::RateLimited(_) => "web_search_rate_limit",
        WebSearchError::QuotaExhausted(_) => "web_search_quota",
        WebSearchError::Api(_) => "web_search_error",
    }
}

#[async_trait]
impl NodeHandler for TavilySearchNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::TavilySearch
    }

    fn schema(&self) -> NodeSchema {
        Self::schema()
    }

    fn validate_static(&self) -> Result<(), String> {
        if !matches!(self.params.search_depth.as_str(), "basic" | "advanced") {
            return Err(format!(
                "unknown search_depth '{}'",
                self.params.search_depth
            ));
        }
        Ok(())
    }

    async fn execute(
        &self,
        ctx: &mut NodeContext<'_>,
        inputs: &Map<String, Value>,
    ) -> NodeExecutionResult {
        let Some(search) = ctx.services.web_search.clone() else {
            return NodeExecutionResult::failure(
                "configuration_error",
                "no web search service configured",
            );
        };

        let query = inputs
            .get("query")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let response = match search.search(query, &self.params).await {
            Ok(response) => response,
            Err(e) => return NodeExecutionResult::failure(error_code(&e), e.to_string()),
        };
        debug!(node = %self.id, results = response.results.len(), "web search done");

        let context = response
            .results
            .iter()
            .map(|r| format!("{}\n{}", r.title, r.content))
            .collect::<Vec<_>>()
            .join("\n\n");

        let results: Vec<Value> = response
            .results
            .iter()
            .map(|r| {
                let mut item = Map::new();
                item.insert("title".into(), Value::String(r.title.clone()));
                item.insert("url".into(), Value::String(r.url.clone()));
                item.insert("content".into(), Value::String(r.content.clone()));
                item.insert(
                    "score".into(),
                    serde_json::Number::from_f64(r.score)
                        .map(Value::Number)
                        .unwrap_or(Value::Null),
                );
                Value::Object(item)
            })
            .collect();

        let mut outputs = Map::new();
        outputs.insert("context".into(), Value::String(context));
        outputs.insert("results".into(), Value::Array(results));
        if let Some(answer) = response.answer {
            outputs.insert("answer".into(), Value::String(answer));
        }
        NodeExecutionResult::success(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeStatus;
    use crate::pool::VariablePool;
    use crate::testing::{bare_services, test_run_info, StaticWebSearch};
    use serde_json::json;
    use std::collections::HashSet;

    fn node() -> TavilySearchNode {
        TavilySearchNode {
            id: "tavily-1".into(),
            params: WebSearchParams::default(),
        }
    }

    #[tokio::test]
    async fn builds_context_from_results() {
        let handler = node();
        let services =
            bare_services().with_web_search(StaticWebSearch::new(&["alpha", "beta"]));
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

        let inputs: Map<String, Value> =
            serde_json::from_value(json!({"query": "rust workflows"})).unwrap();
        let result = handler.execute(&mut ctx, &inputs).await;

        assert_eq!(result.status, NodeStatus::Completed);
        let context = result.outputs["context"].as_str().unwrap();
        assert!(context.contains("alpha"));
        assert!(context.contains("beta"));
        assert_eq!(result.outputs["results"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn maps_auth_errors_to_distinct_code() {
        let handler = node();
        let services = bare_services().with_web_search(StaticWebSearch::failing(
            WebSearchError::Auth("401".into()),
        ));
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

        let inputs: Map<String, Value> = serde_json::from_value(json!({"query": "x"})).unwrap();
        let result = handler.execute(&mut ctx, &inputs).await;
        assert_eq!(result.status, NodeStatus::Failed);
        assert_eq!(result.error_code.as_deref(), Some("web_search_auth"));
    }

    #[test]
    fn validates_search_depth() {
        let mut handler = node();
        handler.params.search_depth = "exhaustive".into();
        assert!(handler.validate_static().is_err());
    }
}
