//! HTTP-request node: calls an external endpoint through the injected
//! fetcher.

use crate::node::{NodeContext, NodeExecutionResult, NodeHandler, NodeSchema};
use crate::schema::{NodeDef, NodeKind, Port, PortType};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Issues one HTTP request. The URL is a template rendered against the
/// pool; the optional `body` input overrides the configured body.
pub struct HttpRequestNode {
    id: String,
    method: String,
    url: String,
    headers: HashMap<String, String>,
    body: Option<Value>,
}

impl HttpRequestNode {
    pub fn from_def(def: &NodeDef) -> Result<Box<dyn NodeHandler>, String> {
        let headers = def
            .config
            .get("headers")
            .and_then(Value::as_object)
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Box::new(HttpRequestNode {
            id: def.id.clone(),
            method: def.config_str("method").unwrap_or("GET").to_uppercase(),
            url: def.config_str("url").unwrap_or_default().to_string(),
            headers,
            body: def.config.get("body").cloned(),
        }))
    }

    pub fn schema() -> NodeSchema {
        NodeSchema {
            kind: NodeKind::HttpRequest,
            label: "HTTP Request",
            icon: "arrow-up-right",
            max_instances: -1,
            configurable: true,
            inputs: vec![Port::new("body", PortType::Any).optional()],
            outputs: vec![
                Port::new("status_code", PortType::Number),
                Port::new("body", PortType::String),
                Port::new("json", PortType::Object).optional(),
            ],
        }
    }
}

#[async_trait]
impl NodeHandler for HttpRequestNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::HttpRequest
    }

    fn schema(&self) -> NodeSchema {
        Self::schema()
    }

    fn validate_static(&self) -> Result<(), String> {
        if self.url.trim().is_empty() {
            return Err("http-request url is empty".into());
        }
        if !matches!(
            self.method.as_str(),
            "GET" | "POST" | "PUT" | "PATCH" | "DELETE" | "HEAD"
        ) {
            return Err(format!("unsupported method '{}'", self.method));
        }
        Ok(())
    }

    async fn execute(
        &self,
        ctx: &mut NodeContext<'_>,
        inputs: &Map<String, Value>,
    ) -> NodeExecutionResult {
        let Some(http) = ctx.services.http.clone() else {
            return NodeExecutionResult::failure(
                "configuration_error",
                "no http client configured",
            );
        };

        let url = match ctx.render(&self.url, &self.id, inputs) {
            Ok(url) => url,
            Err(e) => {
                return NodeExecutionResult::failure("template_render_failed", e.to_string())
            }
        };

        let body = inputs.get("body").or(self.body.as_ref());
        let response = match http.fetch(&self.method, &url, &self.headers, body).await {
            Ok(response) => response,
            Err(e) => return NodeExecutionResult::failure("http_request_failed", e.to_string()),
        };

        let mut outputs = Map::new();
        outputs.insert("status_code".into(), Value::Number(response.status.into()));
        outputs.insert("body".into(), Value::String(response.body.clone()));
        if let Ok(parsed) = serde_json::from_str::<Value>(&response.body) {
            if parsed.is_object() || parsed.is_array() {
                outputs.insert("json".into(), parsed);
            }
        }
        NodeExecutionResult::success(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeStatus;
    use crate::pool::VariablePool;
    use crate::services::{HttpFetchError, HttpFetcher, HttpResponseData};
    use crate::testing::{bare_services, test_run_info};
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;

    struct StubHttp;

    #[async_trait]
    impl HttpFetcher for StubHttp {
        async fn fetch(
            &self,
            method: &str,
            url: &str,
            _headers: &HashMap<String, String>,
            _body: Option<&Value>,
        ) -> Result<HttpResponseData, HttpFetchError> {
            assert_eq!(method, "GET");
            Ok(HttpResponseData {
                status: 200,
                body: format!(r#"{{"echo": "{url}"}}"#),
                headers: HashMap::new(),
            })
        }
    }

    #[tokio::test]
    async fn renders_url_and_parses_json_body() {
        let node = HttpRequestNode {
            id: "http-1".into(),
            method: "GET".into(),
            url: "https://api.example.com/{{ sys.user_message }}".into(),
            headers: HashMap::new(),
            body: None,
        };
        let services = bare_services().with_http(Arc::new(StubHttp));
        let run = test_run_info();
        let mut pool = VariablePool::new();
        pool.set_system("user_message", json!("things"));
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

        let result = node.execute(&mut ctx, &Map::new()).await;
        assert_eq!(result.status, NodeStatus::Completed);
        assert_eq!(result.outputs["status_code"], json!(200));
        assert_eq!(
            result.outputs["json"]["echo"],
            json!("https://api.example.com/things")
        );
    }

    #[test]
    fn validates_method_and_url() {
        let node = HttpRequestNode {
            id: "http-1".into(),
            method: "BREW".into(),
            url: "https://example.com".into(),
            headers: HashMap::new(),
            body: None,
        };
        assert!(node.validate_static().is_err());
    }
}
