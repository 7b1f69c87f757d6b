//! WorkflowRun row model.

use chrono::{DateTime, Utc};
use flowgraph_core::executor::{ExecutionReport, RunStatus};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::FromRow;

/// One row of `workflow_execution_runs`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowRunRow {
    pub id: String,
    pub bot_id: String,
    pub workflow_version_id: Option<String>,
    pub session_id: String,
    pub user_id: Option<String>,
    pub api_key_id: Option<String>,
    pub graph_snapshot: Option<Value>,
    pub inputs: Value,
    pub outputs: Value,
    /// running | completed | failed | cancelled
    pub status: String,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub elapsed_ms: i64,
    pub total_tokens: i64,
    pub total_steps: i32,
}

impl WorkflowRunRow {
    /// Build the run row from an execution report.
    pub fn from_report(
        report: &ExecutionReport,
        bot_id: &str,
        session_id: &str,
        user_id: &str,
        user_message: &str,
        workflow_version_id: Option<&str>,
        api_key_id: Option<&str>,
        graph_snapshot: Option<Value>,
    ) -> Self {
        Self {
            id: report.run_id.clone(),
            bot_id: bot_id.to_string(),
            workflow_version_id: workflow_version_id.map(str::to_string),
            session_id: session_id.to_string(),
            user_id: Some(user_id.to_string()),
            api_key_id: api_key_id.map(str::to_string),
            graph_snapshot,
            inputs: json!({"user_message": user_message}),
            outputs: json!({"response": report.final_response}),
            status: report.status.as_str().to_string(),
            error_message: report.error_message.clone(),
            started_at: report.started_at,
            finished_at: Some(report.finished_at),
            elapsed_ms: report.elapsed_ms as i64,
            total_tokens: report.total_tokens as i64,
            total_steps: report.total_steps as i32,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != RunStatus::Running.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn builds_from_report() {
        let report = ExecutionReport {
            run_id: "run-1".into(),
            status: RunStatus::Completed,
            final_response: Some("hello".into()),
            node_executions: Vec::new(),
            total_tokens: 42,
            total_steps: 4,
            elapsed_ms: 120,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            error_message: None,
            error_code: None,
            conversation: serde_json::Map::new(),
        };

        let row = WorkflowRunRow::from_report(
            &report, "bot-1", "sess-1", "user-1", "hi", Some("wfv-1"), None, None,
        );
        assert_eq!(row.id, "run-1");
        assert_eq!(row.status, "completed");
        assert_eq!(row.total_tokens, 42);
        assert_eq!(row.outputs["response"], "hello");
        assert!(row.is_terminal());
    }
}
