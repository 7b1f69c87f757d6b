//! End node: terminates a branch and carries the final response.

use crate::node::{NodeContext, NodeExecutionResult, NodeHandler, NodeSchema};
use crate::schema::{NodeDef, NodeKind, Port, PortType};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Marks the run's final response. The executor selects the `response` of
/// the first End reached.
pub struct EndNode {
    id: String,
}

impl EndNode {
    pub fn from_def(def: &NodeDef) -> Result<Box<dyn NodeHandler>, String> {
        Ok(Box::new(EndNode { id: def.id.clone() }))
    }

    pub fn schema() -> NodeSchema {
        NodeSchema {
            kind: NodeKind::End,
            label: "End",
            icon: "flag",
            max_instances: -1,
            configurable: false,
            inputs: vec![Port::new("response", PortType::String)],
            outputs: vec![],
        }
    }
}

#[async_trait]
impl NodeHandler for EndNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::End
    }

    fn schema(&self) -> NodeSchema {
        Self::schema()
    }

    fn validate_static(&self) -> Result<(), String> {
        Ok(())
    }

    async fn execute(
        &self,
        _ctx: &mut NodeContext<'_>,
        inputs: &Map<String, Value>,
    ) -> NodeExecutionResult {
        // Echo the response so the run record and the executor's
        // final-response selection see it without re-resolving.
        let response = inputs.get("response").cloned().unwrap_or(Value::Null);
        let mut outputs = Map::new();
        outputs.insert("response".into(), response);
        NodeExecutionResult::success(outputs)
    }
}
