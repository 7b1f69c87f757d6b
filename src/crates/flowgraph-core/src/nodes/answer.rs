//! Answer node: renders the user-facing response from a template.

use crate::node::{NodeContext, NodeExecutionResult, NodeHandler, NodeSchema};
use crate::schema::{NodeDef, NodeKind, Port, PortType};
use crate::template::{Segment, TemplateRenderer};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Renders `template` against the variable pool into `final_output`.
///
/// When the template is the trivial `{{ x }}` pattern and `x` was produced
/// by a streaming node, the tokens already went to the caller as they
/// arrived; the handler then skips re-emitting the rendered text.
pub struct AnswerNode {
    id: String,
    template: String,
    output_format: String,
}

impl AnswerNode {
    pub fn from_def(def: &NodeDef) -> Result<Box<dyn NodeHandler>, String> {
        let template = def
            .config_str("template")
            .unwrap_or_default()
            .to_string();
        let output_format = def
            .config_str("output_format")
            .unwrap_or("text")
            .to_string();
        Ok(Box::new(AnswerNode {
            id: def.id.clone(),
            template,
            output_format,
        }))
    }

    pub fn schema() -> NodeSchema {
        NodeSchema {
            kind: NodeKind::Answer,
            label: "Answer",
            icon: "message",
            max_instances: -1,
            configurable: true,
            inputs: vec![Port::new("input", PortType::Any).optional()],
            outputs: vec![Port::new("final_output", PortType::String)],
        }
    }

    /// The selector of a trivial `{{ x }}` template, if that is all there is.
    fn trivial_selector(&self) -> Option<String> {
        let segments = TemplateRenderer::parse_segments(&self.template).ok()?;
        match segments.as_slice() {
            [Segment::Selector { raw, .. }] => Some(raw.clone()),
            _ => None,
        }
    }
}

#[async_trait]
impl NodeHandler for AnswerNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Answer
    }

    fn schema(&self) -> NodeSchema {
        Self::schema()
    }

    fn validate_static(&self) -> Result<(), String> {
        if self.template.trim().is_empty() {
            return Err("answer template is empty".into());
        }
        if !matches!(self.output_format.as_str(), "text" | "markdown") {
            return Err(format!("unknown output_format '{}'", self.output_format));
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

        if let Some(sink) = ctx.sink {
            let already_streamed = self
                .trivial_selector()
                .is_some_and(|selector| ctx.streamed.contains(&selector));
            if !already_streamed && !rendered.is_empty() {
                sink.emit_chunk(rendered.clone()).await;
            }
        }

        let mut outputs = Map::new();
        outputs.insert("final_output".into(), Value::String(rendered));
        NodeExecutionResult::success(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeStatus;
    use crate::pool::VariablePool;
    use crate::stream::{StreamFrame, StreamSink};
    use crate::testing::{bare_services, test_run_info};
    use serde_json::json;
    use std::collections::HashSet;

    fn node(template: &str) -> AnswerNode {
        AnswerNode {
            id: "answer-1".into(),
            template: template.into(),
            output_format: "text".into(),
        }
    }

    #[test]
    fn empty_template_fails_static_validation() {
        assert!(node("  ").validate_static().is_err());
        assert!(node("{{ conv.pending_response }}").validate_static().is_ok());
    }

    #[test]
    fn trivial_selector_detection() {
        assert_eq!(
            node("{{ llm-1.response }}").trivial_selector(),
            Some("llm-1.response".to_string())
        );
        assert_eq!(node("text {{ llm-1.response }}").trivial_selector(), None);
    }

    #[tokio::test]
    async fn renders_and_streams_once() {
        let handler = node("{{ llm-1.response }}");
        let run = test_run_info();
        let services = bare_services();
        let mut pool = VariablePool::new();
        pool.register_node("llm-1");
        pool.set_node_output("llm-1", "response", json!("streamed text"));

        let (sink, mut rx) = StreamSink::channel(8);
        let mut streamed = HashSet::new();
        // The LLM node already streamed this output.
        streamed.insert("llm-1.response".to_string());
        let mut conv_writes = Vec::new();

        let mut ctx = NodeContext {
            run: &run,
            pool: &mut pool,
            services: &services,
            sink: Some(&sink),
            streamed: &mut streamed,
            conv_writes: &mut conv_writes,
        };

        let result = handler.execute(&mut ctx, &Map::new()).await;
        assert_eq!(result.status, NodeStatus::Completed);
        assert_eq!(result.outputs["final_output"], json!("streamed text"));

        // No duplicate chunk on the sink.
        drop(ctx);
        drop(sink);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn non_trivial_template_emits_one_chunk() {
        let handler = node("Answer: {{ conv.pending_response }}");
        let run = test_run_info();
        let services = bare_services();
        let mut pool = VariablePool::new();
        pool.set_conversation("pending_response", json!("summary"));

        let (sink, mut rx) = StreamSink::channel(8);
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

        let result = handler.execute(&mut ctx, &Map::new()).await;
        assert_eq!(result.outputs["final_output"], json!("Answer: summary"));

        drop(ctx);
        drop(sink);
        assert_eq!(
            rx.recv().await,
            Some(StreamFrame::Chunk { text: "Answer: summary".into() })
        );
    }
}
