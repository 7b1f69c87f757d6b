//! Start node: the graph entry point.

use crate::node::{NodeContext, NodeExecutionResult, NodeHandler, NodeSchema};
use crate::schema::{NodeDef, NodeKind, Port, PortType};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Emits the current user message and session id.
pub struct StartNode {
    id: String,
}

impl StartNode {
    pub fn from_def(def: &NodeDef) -> Result<Box<dyn NodeHandler>, String> {
        Ok(Box::new(StartNode { id: def.id.clone() }))
    }

    pub fn schema() -> NodeSchema {
        NodeSchema {
            kind: NodeKind::Start,
            label: "Start",
            icon: "play",
            max_instances: 1,
            configurable: false,
            inputs: vec![],
            outputs: vec![
                Port::new("query", PortType::String),
                Port::new("session_id", PortType::String),
            ],
        }
    }
}

#[async_trait]
impl NodeHandler for StartNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Start
    }

    fn schema(&self) -> NodeSchema {
        Self::schema()
    }

    fn validate_static(&self) -> Result<(), String> {
        Ok(())
    }

    async fn execute(
        &self,
        ctx: &mut NodeContext<'_>,
        _inputs: &Map<String, Value>,
    ) -> NodeExecutionResult {
        let query = ctx
            .pool
            .get_system("user_message")
            .cloned()
            .unwrap_or(Value::String(String::new()));

        let mut outputs = Map::new();
        outputs.insert("query".into(), query);
        outputs.insert(
            "session_id".into(),
            Value::String(ctx.run.session_id.clone()),
        );
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
    async fn emits_user_message_and_session() {
        let node = StartNode { id: "start-1".into() };
        let run = test_run_info();
        let services = bare_services();
        let mut pool = VariablePool::new();
        pool.set_system("user_message", json!("파이썬이란?"));
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
        assert_eq!(result.outputs["query"], json!("파이썬이란?"));
        assert_eq!(result.outputs["session_id"], json!("sess-test"));
    }
}
