//! Template-transform node: renders an arbitrary template into a string.

use crate::node::{NodeContext, NodeExecutionResult, NodeHandler, NodeSchema};
use crate::schema::{NodeDef, NodeKind, Port, PortType};
use crate::template::TemplateRenderer;
use async_trait::async_trait;
use serde_json::{Map, Value};

pub struct TemplateTransformNode {
    id: String,
    template: String,
}

impl TemplateTransformNode {
    pub fn from_def(def: &NodeDef) -> Result<Box<dyn NodeHandler>, String> {
        Ok(Box::new(TemplateTransformNode {
            id: def.id.clone(),
            template: def.config_str("template").unwrap_or_default().to_string(),
        }))
    }

    pub fn schema() -> NodeSchema {
        NodeSchema {
            kind: NodeKind::TemplateTransform,
            label: "Template",
            icon: "braces",
            max_instances: -1,
            configurable: true,
            inputs: vec![Port::new("input", PortType::Any).optional()],
            outputs: vec![Port::new("output", PortType::String)],
        }
    }
}

#[async_trait]
impl NodeHandler for TemplateTransformNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::TemplateTransform
    }

    fn schema(&self) -> NodeSchema {
        Self::schema()
    }

    fn validate_static(&self) -> Result<(), String> {
        if self.template.is_empty() {
            return Err("template-transform template is empty".into());
        }
        TemplateRenderer::parse_template(&self.template)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    async fn execute(
        &self,
        ctx: &mut NodeContext<'_>,
        inputs: &Map<String, Value>,
    ) -> NodeExecutionResult {
        let rendered = match ctx.render(&self.template, &self.id, inputs) {
            Ok(text) => text,
            Err(e) => {
                return NodeExecutionResult::failure("template_render_failed", e.to_string())
            }
        };
        let mut outputs = Map::new();
        outputs.insert("output".into(), Value::String(rendered));
        NodeExecutionResult::success(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeStatus;
    use crate::pool::VariablePool;
    use crate::testing::{bare_services, test_run_info};
    use serde_json::json;
    use std::collections::HashSet;

    #[tokio::test]
    async fn renders_with_self_inputs() {
        let node = TemplateTransformNode {
            id: "tpl-1".into(),
            template: "Hello {{ self.input }}!".into(),
        };
        let run = test_run_info();
        let services = bare_services();
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

        let inputs: Map<String, Value> = serde_json::from_value(json!({"input": "world"})).unwrap();
        let result = node.execute(&mut ctx, &inputs).await;
        assert_eq!(result.status, NodeStatus::Completed);
        assert_eq!(result.outputs["output"], json!("Hello world!"));
    }
}
