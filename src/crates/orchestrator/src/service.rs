//! The run service: the contract the transport layer calls.
//!
//! One request = one workflow run. The service validates and executes the
//! graph through the engine, persists the run record, and maps the result
//! into the response shape. Multiple requests execute concurrently; each
//! run stays on one task.

use crate::recorder::RunRecorder;
use crate::{OrchestratorError, Result};
use flowgraph_core::executor::{ExecuteParams, ExecutorConfig, RunStatus, WorkflowExecutor};
use flowgraph_core::schema::WorkflowGraph;
use flowgraph_core::services::Services;
use flowgraph_core::stream::StreamSink;
use flowgraph_core::EngineError;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// One execution request.
pub struct ExecuteRequest {
    pub graph: WorkflowGraph,
    /// Extra environment values merged over the graph's own table
    pub env_vars: Map<String, Value>,
    /// Conversation snapshot; loaded from the session store when absent
    pub conv_vars_snapshot: Option<Map<String, Value>>,
    pub session_id: String,
    pub user_message: String,
    pub bot_id: String,
    pub user_id: String,
    pub api_key_id: Option<String>,
    pub workflow_version_id: Option<String>,
    pub stream_sink: Option<StreamSink>,
    /// Per-request deadline override
    pub deadline: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl ExecuteRequest {
    pub fn new(
        graph: WorkflowGraph,
        session_id: impl Into<String>,
        user_message: impl Into<String>,
        bot_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            graph,
            env_vars: Map::new(),
            conv_vars_snapshot: None,
            session_id: session_id.into(),
            user_message: user_message.into(),
            bot_id: bot_id.into(),
            user_id: user_id.into(),
            api_key_id: None,
            workflow_version_id: None,
            stream_sink: None,
            deadline: None,
            cancel: None,
        }
    }
}

/// Error surfaced in the response.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ResponseError {
    pub code: String,
    pub message: String,
}

/// One execution response.
#[derive(Debug, Clone)]
pub struct ExecuteResponse {
    pub final_response: Option<String>,
    pub run_id: Option<String>,
    pub status: String,
    pub total_tokens: u64,
    pub total_steps: u32,
    pub elapsed_ms: u64,
    pub error: Option<ResponseError>,
}

/// Executes runs and records them.
pub struct RunService {
    executor_config: ExecutorConfig,
    services: Arc<Services>,
    recorder: Arc<RunRecorder>,
}

impl RunService {
    pub fn new(
        executor_config: ExecutorConfig,
        services: Arc<Services>,
        recorder: Arc<RunRecorder>,
    ) -> Self {
        Self { executor_config, services, recorder }
    }

    /// Execute one request end to end.
    ///
    /// Validation failure returns `Ok` with a `validation_failed` error and
    /// no run record, matching the engine contract. Transport-level callers
    /// only see `Err` for orchestrator-internal faults.
    pub async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteResponse> {
        let ExecuteRequest {
            mut graph,
            env_vars,
            conv_vars_snapshot,
            session_id,
            user_message,
            bot_id,
            user_id,
            api_key_id,
            workflow_version_id,
            stream_sink,
            deadline,
            cancel,
        } = request;

        for (key, value) in env_vars {
            graph.environment_variables.insert(key, value);
        }
        let graph_snapshot = serde_json::to_value(&graph).ok();

        let mut config = self.executor_config.clone();
        if let Some(deadline) = deadline {
            config = config.with_run_timeout(deadline);
        }
        let executor = WorkflowExecutor::with_config(config);

        let report = match executor
            .execute(ExecuteParams {
                graph,
                session_id: session_id.clone(),
                user_message: user_message.clone(),
                bot_id: bot_id.clone(),
                user_id: user_id.clone(),
                conversation_snapshot: conv_vars_snapshot,
                services: self.services.clone(),
                sink: stream_sink,
                cancel,
            })
            .await
        {
            Ok(report) => report,
            Err(e @ EngineError::ValidationFailed { .. }) => {
                // No run record for graphs that never started executing.
                return Ok(ExecuteResponse {
                    final_response: None,
                    run_id: None,
                    status: "failed".into(),
                    total_tokens: 0,
                    total_steps: 0,
                    elapsed_ms: 0,
                    error: Some(ResponseError {
                        code: e.code().into(),
                        message: e.to_string(),
                    }),
                });
            }
            Err(e) => return Err(OrchestratorError::Engine(e)),
        };

        self.recorder
            .record(
                &report,
                &bot_id,
                &session_id,
                &user_id,
                &user_message,
                workflow_version_id.as_deref(),
                api_key_id.as_deref(),
                graph_snapshot,
            )
            .await;

        info!(
            run_id = %report.run_id,
            status = report.status.as_str(),
            tokens = report.total_tokens,
            "run finished"
        );

        let error = match report.status {
            RunStatus::Completed => None,
            _ => Some(ResponseError {
                code: report.error_code.clone().unwrap_or_else(|| "error".into()),
                message: report
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "run did not complete".into()),
            }),
        };

        Ok(ExecuteResponse {
            final_response: report.final_response.clone(),
            run_id: Some(report.run_id.clone()),
            status: report.status.as_str().to_string(),
            total_tokens: report.total_tokens,
            total_steps: report.total_steps,
            elapsed_ms: report.elapsed_ms,
            error,
        })
    }
}
