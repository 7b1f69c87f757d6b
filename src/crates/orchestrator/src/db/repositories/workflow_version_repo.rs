//! Workflow-version persistence.

use crate::db::connection::DatabasePool;
use crate::db::models::WorkflowVersionRow;
use chrono::Utc;

/// Repository for `workflow_versions`.
pub struct WorkflowVersionRepository;

impl WorkflowVersionRepository {
    /// Insert a draft. The partial unique index rejects a second draft for
    /// the same bot.
    pub async fn insert(
        pool: &DatabasePool,
        row: &WorkflowVersionRow,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO workflow_versions
                 (id, bot_id, version, status, graph, environment_variables,
                  conversation_variables, features, input_schema, output_schema,
                  port_definitions, node_count, edge_count, created_by,
                  created_at, updated_at, published_at, is_in_library,
                  library_title, library_description)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                     $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)",
        )
        .bind(&row.id)
        .bind(&row.bot_id)
        .bind(row.version)
        .bind(&row.status)
        .bind(&row.graph)
        .bind(&row.environment_variables)
        .bind(&row.conversation_variables)
        .bind(&row.features)
        .bind(&row.input_schema)
        .bind(&row.output_schema)
        .bind(&row.port_definitions)
        .bind(row.node_count)
        .bind(row.edge_count)
        .bind(&row.created_by)
        .bind(row.created_at)
        .bind(row.updated_at)
        .bind(row.published_at)
        .bind(row.is_in_library)
        .bind(&row.library_title)
        .bind(&row.library_description)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn get(
        pool: &DatabasePool,
        id: &str,
    ) -> Result<Option<WorkflowVersionRow>, sqlx::Error> {
        sqlx::query_as::<_, WorkflowVersionRow>("SELECT * FROM workflow_versions WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// The single draft of a bot, if any.
    pub async fn get_draft(
        pool: &DatabasePool,
        bot_id: &str,
    ) -> Result<Option<WorkflowVersionRow>, sqlx::Error> {
        sqlx::query_as::<_, WorkflowVersionRow>(
            "SELECT * FROM workflow_versions WHERE bot_id = $1 AND status = 'draft'",
        )
        .bind(bot_id)
        .fetch_optional(pool)
        .await
    }

    /// Latest published version of a bot.
    pub async fn get_published(
        pool: &DatabasePool,
        bot_id: &str,
    ) -> Result<Option<WorkflowVersionRow>, sqlx::Error> {
        sqlx::query_as::<_, WorkflowVersionRow>(
            "SELECT * FROM workflow_versions
             WHERE bot_id = $1 AND status = 'published'
             ORDER BY version DESC LIMIT 1",
        )
        .bind(bot_id)
        .fetch_optional(pool)
        .await
    }

    /// Publish a draft: freeze the graph and stamp `published_at`.
    pub async fn publish(pool: &DatabasePool, id: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE workflow_versions
             SET status = 'published', published_at = $2, updated_at = $2
             WHERE id = $1 AND status = 'draft'",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Update a draft's graph in place.
    pub async fn update_draft_graph(
        pool: &DatabasePool,
        id: &str,
        graph: &serde_json::Value,
    ) -> Result<(), sqlx::Error> {
        let node_count = graph
            .get("nodes")
            .and_then(serde_json::Value::as_array)
            .map(Vec::len)
            .unwrap_or(0) as i32;
        let edge_count = graph
            .get("edges")
            .and_then(serde_json::Value::as_array)
            .map(Vec::len)
            .unwrap_or(0) as i32;

        sqlx::query(
            "UPDATE workflow_versions
             SET graph = $2, node_count = $3, edge_count = $4, updated_at = now()
             WHERE id = $1 AND status = 'draft'",
        )
        .bind(id)
        .bind(graph)
        .bind(node_count)
        .bind(edge_count)
        .execute(pool)
        .await?;
        Ok(())
    }
}
