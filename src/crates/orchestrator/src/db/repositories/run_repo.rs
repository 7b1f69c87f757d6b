//! Run and node-execution persistence.

use crate::db::connection::DatabasePool;
use crate::db::models::{NodeExecutionRow, WorkflowRunRow};

/// Repository for `workflow_execution_runs` and `workflow_node_executions`.
pub struct RunRepository;

impl RunRepository {
    /// Persist a run and its node executions in one transaction.
    pub async fn insert_run_with_nodes(
        pool: &DatabasePool,
        run: &WorkflowRunRow,
        nodes: &[NodeExecutionRow],
    ) -> Result<(), sqlx::Error> {
        let mut tx = pool.begin().await?;

        sqlx::query(
            "INSERT INTO workflow_execution_runs
                 (id, bot_id, workflow_version_id, session_id, user_id, api_key_id,
                  graph_snapshot, inputs, outputs, status, error_message,
                  started_at, finished_at, elapsed_ms, total_tokens, total_steps)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(&run.id)
        .bind(&run.bot_id)
        .bind(&run.workflow_version_id)
        .bind(&run.session_id)
        .bind(&run.user_id)
        .bind(&run.api_key_id)
        .bind(&run.graph_snapshot)
        .bind(&run.inputs)
        .bind(&run.outputs)
        .bind(&run.status)
        .bind(&run.error_message)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.elapsed_ms)
        .bind(run.total_tokens)
        .bind(run.total_steps)
        .execute(&mut *tx)
        .await?;

        for node in nodes {
            sqlx::query(
                "INSERT INTO workflow_node_executions
                     (id, run_id, node_id, node_type, execution_order, inputs, outputs,
                      process_data, status, error_message, started_at, finished_at,
                      elapsed_ms, tokens_used, truncated_fields)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
            )
            .bind(&node.id)
            .bind(&node.run_id)
            .bind(&node.node_id)
            .bind(&node.node_type)
            .bind(node.execution_order)
            .bind(&node.inputs)
            .bind(&node.outputs)
            .bind(&node.process_data)
            .bind(&node.status)
            .bind(&node.error_message)
            .bind(node.started_at)
            .bind(node.finished_at)
            .bind(node.elapsed_ms)
            .bind(node.tokens_used)
            .bind(&node.truncated_fields)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await
    }

    /// Load a run by id.
    pub async fn get_run(
        pool: &DatabasePool,
        run_id: &str,
    ) -> Result<Option<WorkflowRunRow>, sqlx::Error> {
        sqlx::query_as::<_, WorkflowRunRow>(
            "SELECT * FROM workflow_execution_runs WHERE id = $1",
        )
        .bind(run_id)
        .fetch_optional(pool)
        .await
    }

    /// Node executions of one run, in execution order.
    pub async fn list_node_executions(
        pool: &DatabasePool,
        run_id: &str,
    ) -> Result<Vec<NodeExecutionRow>, sqlx::Error> {
        sqlx::query_as::<_, NodeExecutionRow>(
            "SELECT * FROM workflow_node_executions
             WHERE run_id = $1 ORDER BY execution_order",
        )
        .bind(run_id)
        .fetch_all(pool)
        .await
    }

    /// Recent runs of one session, newest first.
    pub async fn list_session_runs(
        pool: &DatabasePool,
        bot_id: &str,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<WorkflowRunRow>, sqlx::Error> {
        sqlx::query_as::<_, WorkflowRunRow>(
            "SELECT * FROM workflow_execution_runs
             WHERE bot_id = $1 AND session_id = $2
             ORDER BY started_at DESC LIMIT $3",
        )
        .bind(bot_id)
        .bind(session_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}
