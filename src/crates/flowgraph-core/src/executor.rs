//! Workflow execution.
//!
//! One run executes on one task: nodes run sequentially in topological
//! order, which keeps causality and the variable-pool invariants simple.
//! Branch gating skips nodes downstream of non-fired branch ports, and the
//! skip cascades through their dependents. Failures are classified; only
//! rate-limit and timeout classes retry.

use crate::error::EngineError;
use crate::llm::Usage;
use crate::node::{NodeContext, NodeHandler, NodeStatus, RunInfo};
use crate::pool::VariablePool;
use crate::registry::NodeRegistry;
use crate::schema::{reserved_scope, NodeKind, Port, PortType, WorkflowGraph};
use crate::selector::{Scope, Selector};
use crate::services::Services;
use crate::stream::StreamSink;
use crate::template::coerce_to_string;
use crate::validator::WorkflowValidator;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

/// One recorded node attempt.
#[derive(Debug, Clone)]
pub struct NodeExecutionRecord {
    pub id: String,
    pub node_id: String,
    pub node_type: String,
    pub execution_order: u32,
    pub inputs: Value,
    pub outputs: Value,
    pub process_data: Value,
    pub status: NodeStatus,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub usage: Option<Usage>,
    /// Input/output keys elided by the recorder's byte cap
    pub truncated_fields: Vec<String>,
}

/// Everything the caller gets back from one run.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub run_id: String,
    pub status: RunStatus,
    pub final_response: Option<String>,
    pub node_executions: Vec<NodeExecutionRecord>,
    pub total_tokens: u64,
    pub total_steps: u32,
    pub elapsed_ms: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    /// Conversation values at run end, for session persistence
    pub conversation: Map<String, Value>,
}

/// Scheduler knobs.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Whole-run deadline
    pub run_timeout: Duration,
    /// Per-node deadline
    pub node_timeout: Duration,
    /// Backoff before retry attempt N (capped exponential)
    pub retry_backoff: Vec<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            run_timeout: Duration::from_secs(300),
            node_timeout: Duration::from_secs(60),
            retry_backoff: vec![Duration::from_millis(100), Duration::from_millis(400)],
        }
    }
}

impl ExecutorConfig {
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = timeout;
        self
    }
}

/// Parameters for one run.
pub struct ExecuteParams {
    pub graph: WorkflowGraph,
    pub session_id: String,
    pub user_message: String,
    pub bot_id: String,
    pub user_id: String,
    /// Conversation values captured by the caller; loaded from the session
    /// store when absent
    pub conversation_snapshot: Option<Map<String, Value>>,
    pub services: Arc<Services>,
    pub sink: Option<StreamSink>,
    pub cancel: Option<CancellationToken>,
}

/// The sequential workflow scheduler.
pub struct WorkflowExecutor {
    config: ExecutorConfig,
    validator: WorkflowValidator,
    registry: &'static NodeRegistry,
}

impl Default for WorkflowExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowExecutor {
    pub fn new() -> Self {
        Self::with_config(ExecutorConfig::default())
    }

    pub fn with_config(config: ExecutorConfig) -> Self {
        Self {
            config,
            validator: WorkflowValidator::new(),
            registry: NodeRegistry::builtin(),
        }
    }

    /// Validate, normalize, and execute a graph.
    ///
    /// Validation failure returns `Err` and writes no run record. Anything
    /// after that returns `Ok` with the run's terminal status inside.
    pub async fn execute(&self, params: ExecuteParams) -> Result<ExecutionReport, EngineError> {
        let ExecuteParams {
            mut graph,
            session_id,
            user_message,
            bot_id,
            user_id,
            conversation_snapshot,
            services,
            sink,
            cancel,
        } = params;

        let outcome = self.validator.validate(&mut graph);
        for warning in &outcome.warnings {
            warn!(code = warning.code, "{}", warning.message);
        }
        if !outcome.ok() {
            let error = EngineError::ValidationFailed { errors: outcome.error_messages() };
            if let Some(sink) = &sink {
                sink.emit_error(error.code(), error.to_string()).await;
            }
            return Err(error);
        }

        let order = self
            .validator
            .execution_order(&graph)
            .ok_or_else(|| EngineError::ValidationFailed {
                errors: vec!["no executable ordering for workflow".into()],
            })?;

        let mut handlers: HashMap<String, Box<dyn NodeHandler>> = HashMap::new();
        for node in &graph.nodes {
            handlers.insert(node.id.clone(), self.registry.construct(node)?);
        }

        let run = RunInfo {
            run_id: Uuid::new_v4().to_string(),
            session_id,
            bot_id,
            user_id,
            request_id: Uuid::new_v4().to_string(),
        };
        info!(run_id = %run.run_id, nodes = order.len(), "workflow run starting");

        // Variable pool bootstrap.
        let mut pool = VariablePool::new();
        pool.init_env(&graph.environment_variables);
        pool.set_system("user_message", Value::String(user_message));
        pool.set_system("session_id", Value::String(run.session_id.clone()));
        pool.set_system("bot_id", Value::String(run.bot_id.clone()));
        pool.set_system("user_id", Value::String(run.user_id.clone()));
        pool.set_system("request_id", Value::String(run.request_id.clone()));

        let snapshot = match conversation_snapshot {
            Some(snapshot) => snapshot,
            None => services
                .session_store
                .load(&run.bot_id, &run.session_id)
                .await
                .unwrap_or_else(|e| {
                    warn!(error = %e, "session store load failed, starting empty");
                    Map::new()
                }),
        };
        pool.init_conversation(&snapshot, &graph.conversation_variables);

        for node in &graph.nodes {
            pool.register_node(node.id.clone());
            if let Some(kind) = node.kind() {
                if let Some(port) = self.registry.default_output_port(kind) {
                    pool.register_default_output(node.id.clone(), port);
                }
            }
        }

        // Branch gates: a node with incoming edges from branch nodes stays
        // dormant until one of those (source, port) pairs fires.
        let branch_nodes: HashSet<&str> = graph
            .nodes
            .iter()
            .filter(|n| n.kind().is_some_and(NodeKind::is_branch))
            .map(|n| n.id.as_str())
            .collect();
        let mut gates: HashMap<&str, Vec<(String, String)>> = HashMap::new();
        for edge in &graph.edges {
            if branch_nodes.contains(edge.source.as_str()) {
                if let Some(port) = &edge.source_port {
                    gates
                        .entry(edge.target.as_str())
                        .or_default()
                        .push((edge.source.clone(), port.clone()));
                }
            }
        }

        let started_at = Utc::now();
        let clock = Instant::now();
        let deadline = clock + self.config.run_timeout;

        let mut records: Vec<NodeExecutionRecord> = Vec::new();
        let mut fired: HashSet<(String, String)> = HashSet::new();
        let mut completed: HashSet<String> = HashSet::new();
        let mut skipped: HashSet<String> = HashSet::new();
        let mut streamed: HashSet<String> = HashSet::new();
        let mut final_response: Option<String> = None;
        let mut last_answer: Option<String> = None;
        let mut status = RunStatus::Running;
        let mut error_message: Option<String> = None;
        let mut error_code: Option<String> = None;
        let cancel = cancel.unwrap_or_default();

        for (index, node_id) in order.iter().enumerate() {
            if cancel.is_cancelled() {
                status = RunStatus::Cancelled;
                error_code = Some("cancelled".into());
                error_message = Some("run cancelled by caller".into());
                break;
            }
            if Instant::now() >= deadline {
                status = RunStatus::Failed;
                error_code = Some("run_timeout".into());
                error_message = Some(format!(
                    "run exceeded {}s deadline",
                    self.config.run_timeout.as_secs()
                ));
                break;
            }

            let Some(node) = graph.node(node_id) else { continue };
            let Some(handler) = handlers.get(node_id) else { continue };
            let node_started = Utc::now();
            let ports = handler.instance_ports();

            // Branch gating and skip cascade.
            if should_skip(node_id, node, &ports.inputs, &gates, &fired, &skipped, &completed) {
                debug!(node = %node_id, "skipped by branch gate");
                skipped.insert(node_id.clone());
                records.push(NodeExecutionRecord {
                    id: Uuid::new_v4().to_string(),
                    node_id: node_id.clone(),
                    node_type: node.type_name().to_string(),
                    execution_order: index as u32,
                    inputs: Value::Object(Map::new()),
                    outputs: Value::Object(Map::new()),
                    process_data: Value::Object(Map::new()),
                    status: NodeStatus::Skipped,
                    error_message: None,
                    error_code: None,
                    started_at: node_started,
                    finished_at: node_started,
                    elapsed_ms: 0,
                    usage: None,
                    truncated_fields: Vec::new(),
                });
                continue;
            }

            // Input assembly through the variable pool.
            let inputs = match resolve_inputs(node_id, node, &ports.inputs, &pool) {
                Ok(inputs) => inputs,
                Err(error) => {
                    status = RunStatus::Failed;
                    error_code = Some(error.code().into());
                    error_message = Some(error.to_string());
                    records.push(NodeExecutionRecord {
                        id: Uuid::new_v4().to_string(),
                        node_id: node_id.clone(),
                        node_type: node.type_name().to_string(),
                        execution_order: index as u32,
                        inputs: Value::Object(Map::new()),
                        outputs: Value::Object(Map::new()),
                        process_data: Value::Object(Map::new()),
                        status: NodeStatus::Failed,
                        error_message: error_message.clone(),
                        error_code: error_code.clone(),
                        started_at: node_started,
                        finished_at: Utc::now(),
                        elapsed_ms: 0,
                        usage: None,
                        truncated_fields: Vec::new(),
                    });
                    break;
                }
            };

            // Dispatch with retry for rate-limit/timeout classes.
            let node_clock = Instant::now();
            let mut conv_writes: Vec<(String, Value)> = Vec::new();
            let mut attempt: u32 = 0;
            let result = loop {
                let budget = self
                    .config
                    .node_timeout
                    .min(deadline.saturating_duration_since(Instant::now()));

                let mut ctx = NodeContext {
                    run: &run,
                    pool: &mut pool,
                    services: &services,
                    sink: sink.as_ref(),
                    streamed: &mut streamed,
                    conv_writes: &mut conv_writes,
                };

                let attempt_result = tokio::select! {
                    _ = cancel.cancelled() => None,
                    executed = tokio::time::timeout(budget, handler.execute(&mut ctx, &inputs)) => {
                        Some(executed)
                    }
                };

                let result = match attempt_result {
                    None => break None,
                    Some(Err(_)) => crate::node::NodeExecutionResult::failure(
                        "node_timeout",
                        format!("node '{node_id}' timed out after {}ms", budget.as_millis()),
                    ),
                    Some(Ok(result)) => result,
                };

                if result.status == NodeStatus::Failed {
                    let allowed = result
                        .error_code
                        .as_deref()
                        .map(retries_for)
                        .unwrap_or(0);
                    if attempt < allowed {
                        let backoff = self
                            .config
                            .retry_backoff
                            .get(attempt as usize)
                            .copied()
                            .unwrap_or_else(|| *self.config.retry_backoff.last().unwrap_or(&Duration::from_millis(400)));
                        warn!(
                            node = %node_id,
                            attempt,
                            code = result.error_code.as_deref().unwrap_or(""),
                            "retrying node after backoff"
                        );
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                        continue;
                    }
                }
                break Some(result);
            };

            let Some(result) = result else {
                status = RunStatus::Cancelled;
                error_code = Some("cancelled".into());
                error_message = Some("run cancelled by caller".into());
                break;
            };

            let finished_at = Utc::now();
            let elapsed_ms = node_clock.elapsed().as_millis() as u64;

            records.push(NodeExecutionRecord {
                id: Uuid::new_v4().to_string(),
                node_id: node_id.clone(),
                node_type: node.type_name().to_string(),
                execution_order: index as u32,
                inputs: Value::Object(inputs.clone()),
                outputs: Value::Object(result.outputs.clone()),
                process_data: Value::Object(result.process_data.clone()),
                status: result.status,
                error_message: result.error.clone(),
                error_code: result.error_code.clone(),
                started_at: node_started,
                finished_at,
                elapsed_ms,
                usage: result.usage,
                truncated_fields: Vec::new(),
            });

            if result.status == NodeStatus::Failed {
                status = RunStatus::Failed;
                error_code = result.error_code.clone();
                error_message = result.error.clone();
                break;
            }

            // Publish outputs and fire ports.
            for (port, value) in &result.outputs {
                if fired.contains(&(node_id.clone(), port.clone())) {
                    warn!(node = %node_id, port = %port, "output port fired twice, last writer wins");
                }
                pool.set_node_output(node_id, port.clone(), value.clone());
                fired.insert((node_id.clone(), port.clone()));
            }
            completed.insert(node_id.clone());

            // Flush conversation writes through the session store.
            for (key, value) in conv_writes.drain(..) {
                if let Err(e) = services
                    .session_store
                    .set(&run.bot_id, &run.session_id, &key, &value)
                    .await
                {
                    warn!(key = %key, error = %e, "conversation flush failed");
                }
            }

            match node.kind() {
                Some(NodeKind::End) if final_response.is_none() => {
                    final_response = result
                        .outputs
                        .get("response")
                        .map(coerce_to_string);
                }
                Some(NodeKind::Answer) => {
                    last_answer = result
                        .outputs
                        .get("final_output")
                        .map(coerce_to_string);
                }
                _ => {}
            }
        }

        // Final response: the first End reached, else the last Answer.
        if status == RunStatus::Running {
            if final_response.is_none() {
                final_response = last_answer;
            }
            if final_response.is_none() {
                status = RunStatus::Failed;
                error_code = Some("no_answer".into());
                error_message = Some("workflow produced no answer".into());
            } else {
                status = RunStatus::Completed;
            }
        }

        let finished_at = Utc::now();
        let total_tokens: u64 = records
            .iter()
            .filter_map(|r| r.usage.as_ref())
            .map(Usage::total)
            .sum();
        let total_steps = records
            .iter()
            .filter(|r| r.status == NodeStatus::Completed)
            .count() as u32;

        if let Some(sink) = &sink {
            match status {
                RunStatus::Completed => sink.emit_done(&run.run_id, status.as_str()).await,
                _ => {
                    sink.emit_error(
                        error_code.as_deref().unwrap_or("error"),
                        error_message.as_deref().unwrap_or("run did not complete"),
                    )
                    .await
                }
            }
        }

        info!(
            run_id = %run.run_id,
            status = status.as_str(),
            steps = total_steps,
            tokens = total_tokens,
            "workflow run finished"
        );

        Ok(ExecutionReport {
            run_id: run.run_id,
            status,
            final_response,
            node_executions: records,
            total_tokens,
            total_steps,
            elapsed_ms: clock.elapsed().as_millis() as u64,
            started_at,
            finished_at,
            error_message,
            error_code,
            conversation: pool.conversation_snapshot(),
        })
    }
}

/// Retry budget per error class.
fn retries_for(code: &str) -> u32 {
    match code {
        "llm_rate_limit" => 2,
        "llm_timeout" => 1,
        _ => 0,
    }
}

/// A node is skipped when its branch gate never fired, or when a *required*
/// mapped dependency was itself skipped or never completed. Optional inputs
/// from a non-firing branch simply resolve to `Null`, which lets branches
/// converge into a common downstream node.
fn should_skip(
    node_id: &str,
    node: &crate::schema::NodeDef,
    input_ports: &[Port],
    gates: &HashMap<&str, Vec<(String, String)>>,
    fired: &HashSet<(String, String)>,
    skipped: &HashSet<String>,
    completed: &HashSet<String>,
) -> bool {
    if let Some(gate_ports) = gates.get(node_id) {
        let any_fired = gate_ports
            .iter()
            .any(|(source, port)| fired.contains(&(source.clone(), port.clone())));
        if !any_fired {
            return true;
        }
    }

    for port in input_ports.iter().filter(|p| p.required) {
        let Some(value) = node.variable_mappings.get(&port.name) else { continue };
        let Some(raw) = crate::schema::extract_selector(value) else { continue };
        let Ok(selector) = Selector::parse(raw) else { continue };
        if let Scope::Node(source) = &selector.scope {
            if source == node_id || reserved_scope(source).is_some() {
                continue;
            }
            if skipped.contains(source) || !completed.contains(source) {
                return true;
            }
        }
    }
    false
}

/// Resolve a node's inputs from the pool and coerce to declared types.
fn resolve_inputs(
    node_id: &str,
    node: &crate::schema::NodeDef,
    ports: &[Port],
    pool: &VariablePool,
) -> Result<Map<String, Value>, EngineError> {
    let mut inputs = Map::new();

    for port in ports {
        let mapping = node
            .variable_mappings
            .get(&port.name)
            .and_then(crate::schema::extract_selector);

        let value = match mapping {
            Some(raw) => {
                let selector =
                    Selector::parse(raw).map_err(|_| EngineError::NodeInputUnresolved {
                        node: node_id.to_string(),
                        port: port.name.clone(),
                    })?;
                match pool.resolve(&selector) {
                    Some(value) => value,
                    None if port.required => {
                        return Err(EngineError::NodeInputUnresolved {
                            node: node_id.to_string(),
                            port: port.name.clone(),
                        });
                    }
                    None => Value::Null,
                }
            }
            None => match &port.default {
                Some(default) => default.clone(),
                None if port.required => {
                    return Err(EngineError::NodeInputUnresolved {
                        node: node_id.to_string(),
                        port: port.name.clone(),
                    });
                }
                None => continue,
            },
        };

        let coerced = coerce_input(value, port.port_type).map_err(|actual| {
            EngineError::InputTypeMismatch {
                node: node_id.to_string(),
                port: port.name.clone(),
                expected: port.port_type.as_str().to_string(),
                actual,
            }
        })?;
        inputs.insert(port.name.clone(), coerced);
    }

    Ok(inputs)
}

/// Port-type coercion. `any` passes through; scalars convert leniently;
/// arrays and objects must already match.
fn coerce_input(value: Value, port_type: PortType) -> Result<Value, String> {
    match port_type {
        PortType::Any => Ok(value),
        PortType::String => Ok(match value {
            Value::String(_) => value,
            other => Value::String(coerce_to_string(&other)),
        }),
        PortType::Number => match &value {
            Value::Number(_) => Ok(value),
            Value::Null => Ok(value),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| format!("string '{s}'")),
            other => Err(type_name(other).to_string()),
        },
        PortType::Boolean => match &value {
            Value::Bool(_) | Value::Null => Ok(value),
            Value::String(s) if s == "true" => Ok(Value::Bool(true)),
            Value::String(s) if s == "false" => Ok(Value::Bool(false)),
            other => Err(type_name(other).to_string()),
        },
        PortType::Array => match &value {
            Value::Array(_) | Value::Null => Ok(value),
            other => Err(type_name(other).to_string()),
        },
        PortType::Object => match &value {
            Value::Object(_) | Value::Null => Ok(value),
            other => Err(type_name(other).to_string()),
        },
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn input_coercion_rules() {
        assert_eq!(coerce_input(json!(7), PortType::String).unwrap(), json!("7"));
        assert_eq!(coerce_input(json!("7"), PortType::Number).unwrap(), json!(7.0));
        assert_eq!(coerce_input(json!("true"), PortType::Boolean).unwrap(), json!(true));
        assert_eq!(coerce_input(json!([1]), PortType::Array).unwrap(), json!([1]));
        assert!(coerce_input(json!({"a": 1}), PortType::Array).is_err());
        assert!(coerce_input(json!("not a number"), PortType::Number).is_err());
        assert_eq!(
            coerce_input(json!({"a": 1}), PortType::Any).unwrap(),
            json!({"a": 1})
        );
    }

    #[test]
    fn retry_budget_by_error_class() {
        assert_eq!(retries_for("llm_rate_limit"), 2);
        assert_eq!(retries_for("llm_timeout"), 1);
        assert_eq!(retries_for("llm_auth"), 0);
        assert_eq!(retries_for("vector_store_error"), 0);
    }
}
