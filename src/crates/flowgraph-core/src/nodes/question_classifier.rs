//! Question-classifier node: LLM-driven branching over labeled classes.

use crate::llm::{GenerateOptions, Message};
use crate::node::{NodeContext, NodeExecutionResult, NodeHandler, NodeSchema};
use crate::schema::{NodeDef, NodeKind, Port, PortType, Ports};
use crate::template::TemplateRenderer;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

/// One classification target.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassDef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Renders `query_template`, asks the model to pick a class, and fires
/// exactly one `class_<id>_branch` output port.
pub struct QuestionClassifierNode {
    id: String,
    provider: Option<String>,
    model: String,
    classes: Vec<ClassDef>,
    instruction: Option<String>,
    query_template: String,
    temperature: f64,
    max_tokens: u32,
}

impl QuestionClassifierNode {
    pub fn from_def(def: &NodeDef) -> Result<Box<dyn NodeHandler>, String> {
        let classes: Vec<ClassDef> = match def.config.get("classes") {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| format!("invalid classifier classes: {e}"))?,
            None => Vec::new(),
        };

        Ok(Box::new(QuestionClassifierNode {
            id: def.id.clone(),
            provider: def.config_str("provider").map(str::to_string),
            model: def.config_str("model").unwrap_or("gpt-4o-mini").to_string(),
            classes,
            instruction: def.config_str("instruction").map(str::to_string),
            query_template: def
                .config_str("query_template")
                .unwrap_or("{{ sys.user_message }}")
                .to_string(),
            temperature: def
                .config
                .get("temperature")
                .and_then(Value::as_f64)
                .unwrap_or(0.0),
            max_tokens: def
                .config
                .get("max_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(64) as u32,
        }))
    }

    pub fn schema() -> NodeSchema {
        NodeSchema {
            kind: NodeKind::QuestionClassifier,
            label: "Question Classifier",
            icon: "split",
            max_instances: -1,
            configurable: true,
            inputs: vec![Port::new("query", PortType::String)],
            outputs: vec![],
        }
    }

    fn branch_port(class_id: &str) -> String {
        format!("class_{class_id}_branch")
    }

    fn classification_prompt(&self, query: &str) -> String {
        let mut prompt = String::from(
            "Classify the user input into exactly one of the following classes.\n",
        );
        for class in &self.classes {
            match &class.description {
                Some(description) => {
                    prompt.push_str(&format!("- {}: {} ({})\n", class.id, class.name, description))
                }
                None => prompt.push_str(&format!("- {}: {}\n", class.id, class.name)),
            }
        }
        prompt.push_str("\nUser input:\n");
        prompt.push_str(query);
        prompt.push_str("\n\nRespond with the class id only.");
        prompt
    }

    /// Match the model's answer back to a class: exact id, then id or name
    /// substring. Falls back to the first class.
    fn pick_class(&self, response: &str) -> Option<&ClassDef> {
        let answer = response.trim().trim_matches('"').to_lowercase();
        self.classes
            .iter()
            .find(|c| c.id.to_lowercase() == answer)
            .or_else(|| {
                self.classes.iter().find(|c| {
                    answer.contains(&c.id.to_lowercase())
                        || answer.contains(&c.name.to_lowercase())
                })
            })
            .or_else(|| self.classes.first())
    }
}

#[async_trait]
impl NodeHandler for QuestionClassifierNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::QuestionClassifier
    }

    fn schema(&self) -> NodeSchema {
        Self::schema()
    }

    /// One output port per configured class.
    fn instance_ports(&self) -> Ports {
        Ports {
            inputs: vec![Port::new("query", PortType::String)],
            outputs: self
                .classes
                .iter()
                .map(|c| Port::new(Self::branch_port(&c.id), PortType::Any).optional())
                .collect(),
        }
    }

    fn validate_static(&self) -> Result<(), String> {
        if self.classes.is_empty() {
            return Err("question-classifier needs at least one class".into());
        }
        TemplateRenderer::parse_template(&self.query_template)
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

        let query = match ctx.render(&self.query_template, &self.id, inputs) {
            Ok(text) => text,
            Err(e) => {
                return NodeExecutionResult::failure("template_render_failed", e.to_string())
            }
        };

        let mut messages = Vec::new();
        if let Some(instruction) = &self.instruction {
            messages.push(Message::system(instruction.clone()));
        }
        messages.push(Message::user(self.classification_prompt(&query)));

        let opts = GenerateOptions {
            model: Some(self.model.clone()),
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            stop: None,
            provider: self.provider.clone(),
        };

        let generation = match model.generate(&messages, &opts).await {
            Ok(generation) => generation,
            Err(e) => return NodeExecutionResult::failure(e.code(), e.to_string()),
        };

        let Some(class) = self.pick_class(&generation.text) else {
            return NodeExecutionResult::failure(
                "classification_failed",
                "no classes configured",
            );
        };
        debug!(node = %self.id, class = %class.id, "classified input");

        let mut outputs = Map::new();
        outputs.insert(
            Self::branch_port(&class.id),
            Value::String(class.id.clone()),
        );
        let mut process_data = Map::new();
        process_data.insert("selected_class".into(), Value::String(class.id.clone()));
        process_data.insert("raw_response".into(), Value::String(generation.text));

        NodeExecutionResult::success(outputs)
            .with_usage(generation.usage)
            .with_process_data(process_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeStatus;
    use crate::pool::VariablePool;
    use crate::testing::{bare_services, test_run_info, StaticModel};
    use serde_json::json;
    use std::collections::HashSet;

    fn classifier() -> QuestionClassifierNode {
        QuestionClassifierNode {
            id: "classifier-1".into(),
            provider: None,
            model: "gpt-4o-mini".into(),
            classes: vec![
                ClassDef { id: "positive".into(), name: "마음에 든다".into(), description: None },
                ClassDef { id: "negative".into(), name: "마음에 들지 않는다".into(), description: None },
            ],
            instruction: Some("Classify user satisfaction.".into()),
            query_template: "{{ sys.user_message }}".into(),
            temperature: 0.0,
            max_tokens: 64,
        }
    }

    #[tokio::test]
    async fn fires_exactly_one_branch() {
        let node = classifier();
        let model = StaticModel::new("negative");
        let services = bare_services().with_llm(model);
        let run = test_run_info();
        let mut pool = VariablePool::new();
        pool.set_system("user_message", json!("별로예요"));
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
        assert_eq!(result.outputs.len(), 1);
        assert_eq!(result.outputs["class_negative_branch"], json!("negative"));
        assert_eq!(result.process_data["selected_class"], json!("negative"));
        assert!(result.usage.is_some());
    }

    #[test]
    fn unparseable_answer_falls_back_to_first_class() {
        let node = classifier();
        assert_eq!(node.pick_class("no idea").unwrap().id, "positive");
        assert_eq!(node.pick_class(" NEGATIVE ").unwrap().id, "negative");
        assert_eq!(node.pick_class("마음에 든다").unwrap().id, "positive");
    }

    #[test]
    fn instance_ports_follow_classes() {
        let node = classifier();
        let ports = node.instance_ports();
        let names: Vec<&str> = ports.outputs.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["class_positive_branch", "class_negative_branch"]);
    }

    #[test]
    fn requires_classes() {
        let mut node = classifier();
        node.classes.clear();
        assert!(node.validate_static().is_err());
    }
}
