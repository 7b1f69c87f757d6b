//! Assigner node: writes values into conversation or environment scope.

use crate::node::{NodeContext, NodeExecutionResult, NodeHandler, NodeSchema};
use crate::schema::{NodeDef, NodeKind, Port, PortType, Ports};
use crate::selector::{Scope, Selector};
use crate::template::coerce_to_string;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

/// One write operation.
#[derive(Debug, Clone, Deserialize)]
pub struct OperationDef {
    pub write_mode: String,
    pub input_type: String,
    #[serde(default)]
    pub constant_value: Option<Value>,
}

/// Applies an ordered list of writes to `conv.*` (persisted across turns)
/// or `env.*` (run-local). Each operation exposes an `operation_i_result`
/// output so downstream nodes can sequence after the write.
pub struct AssignerNode {
    id: String,
    operations: Vec<OperationDef>,
    /// The node's own variable mappings; target ports carry the *selector
    /// string naming the write target*, not a value to resolve.
    mappings: Map<String, Value>,
}

impl AssignerNode {
    pub fn from_def(def: &NodeDef) -> Result<Box<dyn NodeHandler>, String> {
        let operations: Vec<OperationDef> = match def.config.get("operations") {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| format!("invalid assigner operations: {e}"))?,
            None => Vec::new(),
        };
        Ok(Box::new(AssignerNode {
            id: def.id.clone(),
            operations,
            mappings: def.variable_mappings.clone(),
        }))
    }

    pub fn schema() -> NodeSchema {
        NodeSchema {
            kind: NodeKind::Assigner,
            label: "Assigner",
            icon: "pencil",
            max_instances: -1,
            configurable: true,
            inputs: vec![],
            outputs: vec![],
        }
    }

    fn target_selector(&self, index: usize) -> Option<&str> {
        crate::schema::extract_selector(self.mappings.get(&format!("operation_{index}_target"))?)
    }
}

#[async_trait]
impl NodeHandler for AssignerNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Assigner
    }

    fn schema(&self) -> NodeSchema {
        Self::schema()
    }

    /// Ports follow the configured operations: `operation_i_target` (the
    /// target selector), `operation_i_value` (for variable inputs), and
    /// `operation_i_result`.
    fn instance_ports(&self) -> Ports {
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        for (i, op) in self.operations.iter().enumerate() {
            inputs.push(Port::new(format!("operation_{i}_target"), PortType::String));
            let needs_value = op.input_type == "variable" && op.write_mode != "clear";
            let value_port = Port::new(format!("operation_{i}_value"), PortType::Any);
            inputs.push(if needs_value { value_port } else { value_port.optional() });
            outputs.push(Port::new(format!("operation_{i}_result"), PortType::Any).optional());
        }
        Ports { inputs, outputs }
    }

    fn validate_static(&self) -> Result<(), String> {
        for (i, op) in self.operations.iter().enumerate() {
            if !matches!(op.write_mode.as_str(), "over-write" | "append" | "clear") {
                return Err(format!("operation {i}: unknown write_mode '{}'", op.write_mode));
            }
            if !matches!(op.input_type.as_str(), "variable" | "constant") {
                return Err(format!("operation {i}: unknown input_type '{}'", op.input_type));
            }
        }
        Ok(())
    }

    async fn execute(
        &self,
        ctx: &mut NodeContext<'_>,
        inputs: &Map<String, Value>,
    ) -> NodeExecutionResult {
        let mut outputs = Map::new();

        for (i, op) in self.operations.iter().enumerate() {
            let Some(raw_target) = self.target_selector(i) else {
                return NodeExecutionResult::failure(
                    "assigner_target_missing",
                    format!("operation {i} has no target mapping"),
                );
            };
            let selector = match Selector::parse(raw_target) {
                Ok(selector) => selector,
                Err(e) => {
                    return NodeExecutionResult::failure("assigner_target_invalid", e.to_string())
                }
            };
            let Some(key) = selector.key().map(str::to_string) else {
                return NodeExecutionResult::failure(
                    "assigner_target_invalid",
                    format!("target '{raw_target}' names no key"),
                );
            };

            let incoming = match op.write_mode.as_str() {
                "clear" => Value::String(String::new()),
                _ if op.input_type == "constant" => {
                    op.constant_value.clone().unwrap_or(Value::Null)
                }
                _ => inputs
                    .get(&format!("operation_{i}_value"))
                    .cloned()
                    .unwrap_or(Value::Null),
            };

            let effective = match (&selector.scope, op.write_mode.as_str()) {
                (Scope::Conversation, "append") => {
                    let merged = append_value(ctx.pool.get_conversation(&key), incoming);
                    ctx.write_conversation(key.clone(), merged.clone());
                    merged
                }
                (Scope::Conversation, _) => {
                    ctx.write_conversation(key.clone(), incoming.clone());
                    incoming
                }
                (Scope::Env, "append") => {
                    let existing = ctx.pool.get_env(&key).cloned().unwrap_or(Value::Null);
                    let merged = append_value(existing, incoming);
                    ctx.pool.set_env(key.clone(), merged.clone());
                    merged
                }
                (Scope::Env, _) => {
                    ctx.pool.set_env(key.clone(), incoming.clone());
                    incoming
                }
                _ => {
                    return NodeExecutionResult::failure(
                        "assigner_target_invalid",
                        format!("target '{raw_target}' must be conv.* or env.*"),
                    );
                }
            };

            debug!(node = %self.id, target = %raw_target, mode = %op.write_mode, "assigned");
            outputs.insert(format!("operation_{i}_result"), effective);
        }

        NodeExecutionResult::success(outputs)
    }
}

/// Append semantics: strings concatenate, arrays push, null adopts the value.
fn append_value(existing: Value, incoming: Value) -> Value {
    match existing {
        Value::Null => incoming,
        Value::String(s) => Value::String(format!("{s}{}", coerce_to_string(&incoming))),
        Value::Array(mut items) => {
            items.push(incoming);
            Value::Array(items)
        }
        other => Value::String(format!(
            "{}{}",
            coerce_to_string(&other),
            coerce_to_string(&incoming)
        )),
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

    fn assigner() -> AssignerNode {
        let def: NodeDef = serde_json::from_value(json!({
            "id": "assigner-1",
            "type": "assigner",
            "data": {
                "type": "assigner",
                "operations": [
                    {"write_mode": "over-write", "input_type": "variable"},
                    {"write_mode": "over-write", "input_type": "constant", "constant_value": "wait_feedback"},
                    {"write_mode": "clear", "input_type": "constant"}
                ]
            },
            "variable_mappings": {
                "operation_0_target": "conversation.pending_response",
                "operation_0_value": "llm-1.response",
                "operation_1_target": "conversation.feedback_stage",
                "operation_2_target": "conversation.last_feedback"
            }
        }))
        .unwrap();

        let operations =
            serde_json::from_value(def.config.get("operations").cloned().unwrap()).unwrap();
        AssignerNode {
            id: def.id.clone(),
            operations,
            mappings: def.variable_mappings.clone(),
        }
    }

    #[tokio::test]
    async fn writes_conversation_and_reports_results() {
        let node = assigner();
        let run = test_run_info();
        let services = bare_services();
        let mut pool = VariablePool::new();
        pool.set_conversation("last_feedback", json!("old feedback"));
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
            serde_json::from_value(json!({"operation_0_value": "the summary"})).unwrap();
        let result = node.execute(&mut ctx, &inputs).await;

        assert_eq!(result.status, NodeStatus::Completed);
        assert_eq!(result.outputs["operation_0_result"], json!("the summary"));
        assert_eq!(result.outputs["operation_1_result"], json!("wait_feedback"));
        assert_eq!(result.outputs["operation_2_result"], json!(""));

        // Writes are visible to later nodes in the same run.
        assert_eq!(pool.get_conversation("pending_response"), json!("the summary"));
        assert_eq!(pool.get_conversation("feedback_stage"), json!("wait_feedback"));
        assert_eq!(pool.get_conversation("last_feedback"), json!(""));

        // And queued for the session-store flush.
        assert_eq!(conv_writes.len(), 3);
    }

    #[tokio::test]
    async fn append_concatenates_strings_and_pushes_arrays() {
        assert_eq!(
            append_value(json!("a"), json!("b")),
            json!("ab")
        );
        assert_eq!(
            append_value(json!(["a"]), json!("b")),
            json!(["a", "b"])
        );
        assert_eq!(append_value(Value::Null, json!("x")), json!("x"));
    }

    #[tokio::test]
    async fn rejects_non_scope_targets() {
        let mut node = assigner();
        node.mappings.insert(
            "operation_0_target".into(),
            json!("llm-1.response"),
        );
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

        let inputs: Map<String, Value> =
            serde_json::from_value(json!({"operation_0_value": "v"})).unwrap();
        let result = node.execute(&mut ctx, &inputs).await;
        assert_eq!(result.status, NodeStatus::Failed);
        assert_eq!(result.error_code.as_deref(), Some("assigner_target_invalid"));
    }

    #[test]
    fn instance_ports_follow_operations() {
        let node = assigner();
        let ports = node.instance_ports();
        let input_names: Vec<&str> = ports.inputs.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            input_names,
            vec![
                "operation_0_target",
                "operation_0_value",
                "operation_1_target",
                "operation_1_value",
                "operation_2_target",
                "operation_2_value"
            ]
        );
        // Constant and clear operations do not require a value input.
        assert!(ports.inputs[1].required);
        assert!(!ports.inputs[3].required);
        assert!(!ports.inputs[5].required);
    }

    #[test]
    fn validates_modes() {
        let mut node = assigner();
        node.operations[0].write_mode = "merge".into();
        assert!(node.validate_static().is_err());
    }
}
