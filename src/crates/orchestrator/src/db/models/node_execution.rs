//! NodeExecution row model, including the byte-cap truncation applied to
//! recorded inputs/outputs.

use chrono::{DateTime, Utc};
use flowgraph_core::executor::NodeExecutionRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

/// One row of `workflow_node_executions`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NodeExecutionRow {
    pub id: String,
    pub run_id: String,
    pub node_id: String,
    pub node_type: String,
    pub execution_order: i32,
    pub inputs: Value,
    pub outputs: Value,
    pub process_data: Value,
    pub status: String,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub elapsed_ms: i64,
    pub tokens_used: i64,
    /// Keys elided from inputs/outputs by the byte cap
    pub truncated_fields: Value,
}

impl NodeExecutionRow {
    /// Convert a scheduler record, truncating oversized input/output
    /// values. Truncated keys are listed in `truncated_fields`.
    pub fn from_record(record: &NodeExecutionRecord, run_id: &str, cap_bytes: usize) -> Self {
        let mut truncated = Vec::new();
        let inputs = truncate_map(&record.inputs, cap_bytes, "inputs", &mut truncated);
        let outputs = truncate_map(&record.outputs, cap_bytes, "outputs", &mut truncated);

        Self {
            id: record.id.clone(),
            run_id: run_id.to_string(),
            node_id: record.node_id.clone(),
            node_type: record.node_type.clone(),
            execution_order: record.execution_order as i32,
            inputs,
            outputs,
            process_data: record.process_data.clone(),
            status: record.status.as_str().to_string(),
            error_message: record.error_message.clone(),
            started_at: record.started_at,
            finished_at: Some(record.finished_at),
            elapsed_ms: record.elapsed_ms as i64,
            tokens_used: record.usage.map(|u| u.total() as i64).unwrap_or(0),
            truncated_fields: Value::Array(
                truncated.into_iter().map(Value::String).collect(),
            ),
        }
    }
}

/// Replace values whose serialized form exceeds `cap_bytes` with a marker.
fn truncate_map(
    value: &Value,
    cap_bytes: usize,
    section: &str,
    truncated: &mut Vec<String>,
) -> Value {
    let Value::Object(map) = value else {
        return value.clone();
    };

    let mut out = serde_json::Map::new();
    for (key, entry) in map {
        let size = serde_json::to_string(entry).map(|s| s.len()).unwrap_or(0);
        if size > cap_bytes {
            truncated.push(format!("{section}.{key}"));
            out.insert(
                key.clone(),
                Value::String(format!("[truncated {size} bytes]")),
            );
        } else {
            out.insert(key.clone(), entry.clone());
        }
    }
    Value::Object(out)
}
