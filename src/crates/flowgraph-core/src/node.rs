//! The node handler contract.
//!
//! Every node type implements [`NodeHandler`]: a schema describing its
//! ports, a static config check, and an async `execute` that receives its
//! resolved inputs and the run context. Handlers never unwind; failures
//! come back as a [`NodeExecutionResult`] with `status = Failed`.

use crate::llm::Usage;
use crate::pool::VariablePool;
use crate::schema::{NodeKind, Port, Ports};
use crate::services::Services;
use crate::stream::StreamSink;
use crate::template::{TemplateRenderError, TemplateRenderer};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;

/// Execution status of one node attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl NodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Running => "running",
            NodeStatus::Completed => "completed",
            NodeStatus::Failed => "failed",
            NodeStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one node execution.
#[derive(Debug, Clone)]
pub struct NodeExecutionResult {
    pub status: NodeStatus,
    /// Values written to the pool under the node's output ports
    pub outputs: Map<String, Value>,
    pub error: Option<String>,
    /// Stable error code when failed (`llm_rate_limit`, ...)
    pub error_code: Option<String>,
    pub usage: Option<Usage>,
    /// Handler-internal diagnostics recorded alongside inputs/outputs
    pub process_data: Map<String, Value>,
}

impl NodeExecutionResult {
    pub fn success(outputs: Map<String, Value>) -> Self {
        Self {
            status: NodeStatus::Completed,
            outputs,
            error: None,
            error_code: None,
            usage: None,
            process_data: Map::new(),
        }
    }

    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: NodeStatus::Failed,
            outputs: Map::new(),
            error: Some(message.into()),
            error_code: Some(code.into()),
            usage: None,
            process_data: Map::new(),
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_process_data(mut self, data: Map<String, Value>) -> Self {
        self.process_data = data;
        self
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.error_code.as_deref(),
            Some("llm_rate_limit") | Some("llm_timeout")
        )
    }
}

/// Node type metadata served to editors and used by the validator.
#[derive(Debug, Clone)]
pub struct NodeSchema {
    pub kind: NodeKind,
    pub label: &'static str,
    pub icon: &'static str,
    /// -1 means unlimited
    pub max_instances: i32,
    pub configurable: bool,
    pub inputs: Vec<Port>,
    pub outputs: Vec<Port>,
}

impl NodeSchema {
    pub fn ports(&self) -> Ports {
        Ports {
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
        }
    }
}

/// Identity of the current run, visible to handlers.
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub run_id: String,
    pub session_id: String,
    pub bot_id: String,
    pub user_id: String,
    pub request_id: String,
}

/// Mutable per-node execution context handed to handlers.
pub struct NodeContext<'a> {
    pub run: &'a RunInfo,
    pub pool: &'a mut VariablePool,
    pub services: &'a Services,
    pub sink: Option<&'a StreamSink>,
    /// Selectors (`node.port`) whose values already streamed to the sink
    pub streamed: &'a mut HashSet<String>,
    /// Conversation writes to flush through the session store after the node
    pub conv_writes: &'a mut Vec<(String, Value)>,
}

impl NodeContext<'_> {
    /// Render a template with the node's own inputs overlaid on the pool.
    pub fn render(
        &self,
        template: &str,
        own_id: &str,
        inputs: &Map<String, Value>,
    ) -> Result<String, TemplateRenderError> {
        TemplateRenderer::render(template, self.pool, Some(own_id), Some(inputs))
    }

    /// Record a conversation write: visible to later nodes immediately,
    /// flushed to the session store by the executor.
    pub fn write_conversation(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        self.pool.set_conversation(key.clone(), value.clone());
        self.conv_writes.push((key, value));
    }
}

/// Contract implemented by every node type.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// The node's graph id.
    fn id(&self) -> &str;

    fn kind(&self) -> NodeKind;

    fn schema(&self) -> NodeSchema;

    /// Ports of this node *instance*. Branch nodes derive output ports from
    /// their configured cases/classes; everything else uses the type schema.
    fn instance_ports(&self) -> Ports {
        self.schema().ports()
    }

    /// Validate configuration without executing.
    fn validate_static(&self) -> Result<(), String>;

    /// Execute with inputs resolved by the scheduler, keyed by input port.
    async fn execute(
        &self,
        ctx: &mut NodeContext<'_>,
        inputs: &Map<String, Value>,
    ) -> NodeExecutionResult;
}
