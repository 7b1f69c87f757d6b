//! Run recording.
//!
//! Node executions accumulate in memory during the run (the scheduler
//! already buffers them in its report) and flush once at run end, in a
//! single transaction. Recorder failure never fails the run; the
//! `workflow.log` event is fire-and-forget.

use crate::db::models::{NodeExecutionRow, WorkflowRunRow};
use crate::db::repositories::RunRepository;
use crate::db::DatabasePool;
use async_trait::async_trait;
use flowgraph_core::executor::ExecutionReport;
use flowgraph_core::services::EventPublisher;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

/// Persistence sink for finished runs.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Persist the run and its node executions atomically.
    async fn persist(
        &self,
        run: &WorkflowRunRow,
        nodes: &[NodeExecutionRow],
    ) -> Result<(), String>;
}

/// Postgres-backed run store.
pub struct PgRunStore {
    pool: DatabasePool,
}

impl PgRunStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn persist(
        &self,
        run: &WorkflowRunRow,
        nodes: &[NodeExecutionRow],
    ) -> Result<(), String> {
        RunRepository::insert_run_with_nodes(&self.pool, run, nodes)
            .await
            .map_err(|e| e.to_string())
    }
}

/// In-memory run store for tests and single-process setups.
#[derive(Default)]
pub struct MemoryRunStore {
    runs: Mutex<Vec<(WorkflowRunRow, Vec<NodeExecutionRow>)>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn runs(&self) -> Vec<(WorkflowRunRow, Vec<NodeExecutionRow>)> {
        self.runs.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.runs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.lock().is_empty()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn persist(
        &self,
        run: &WorkflowRunRow,
        nodes: &[NodeExecutionRow],
    ) -> Result<(), String> {
        self.runs.lock().push((run.clone(), nodes.to_vec()));
        Ok(())
    }
}

/// Persists one `WorkflowRun` plus its `NodeExecution`s and emits the
/// `workflow.log` event.
pub struct RunRecorder {
    store: Arc<dyn RunStore>,
    events: Option<Arc<dyn EventPublisher>>,
    io_truncate_bytes: usize,
}

impl RunRecorder {
    pub fn new(store: Arc<dyn RunStore>, io_truncate_bytes: usize) -> Self {
        Self { store, events: None, io_truncate_bytes }
    }

    pub fn with_events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Flush a finished run. Failures are logged, never propagated.
    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        report: &ExecutionReport,
        bot_id: &str,
        session_id: &str,
        user_id: &str,
        user_message: &str,
        workflow_version_id: Option<&str>,
        api_key_id: Option<&str>,
        graph_snapshot: Option<serde_json::Value>,
    ) -> Option<WorkflowRunRow> {
        let run = WorkflowRunRow::from_report(
            report,
            bot_id,
            session_id,
            user_id,
            user_message,
            workflow_version_id,
            api_key_id,
            graph_snapshot,
        );
        let nodes: Vec<NodeExecutionRow> = report
            .node_executions
            .iter()
            .map(|record| NodeExecutionRow::from_record(record, &run.id, self.io_truncate_bytes))
            .collect();

        if let Err(e) = self.store.persist(&run, &nodes).await {
            warn!(run_id = %run.id, error = %e, "run persistence failed");
            return None;
        }
        debug!(run_id = %run.id, nodes = nodes.len(), "run recorded");

        if let Some(events) = &self.events {
            let payload = json!({
                "event_type": "workflow.log",
                "run": run,
                "nodes": nodes,
            });
            events.publish(payload).await;
        }

        Some(run)
    }
}
