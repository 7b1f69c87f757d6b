//! WorkflowVersion row model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::FromRow;
use uuid::Uuid;

/// One row of `workflow_versions`.
///
/// A bot has at most one `draft` version (partial unique index); publishing
/// freezes the graph.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowVersionRow {
    pub id: String,
    pub bot_id: String,
    pub version: i32,
    /// draft | published
    pub status: String,
    pub graph: Value,
    pub environment_variables: Value,
    pub conversation_variables: Value,
    pub features: Value,
    pub input_schema: Option<Value>,
    pub output_schema: Option<Value>,
    pub port_definitions: Option<Value>,
    pub node_count: i32,
    pub edge_count: i32,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub is_in_library: bool,
    pub library_title: Option<String>,
    pub library_description: Option<String>,
}

impl WorkflowVersionRow {
    /// New draft for a bot from a graph document.
    pub fn draft(bot_id: impl Into<String>, graph: Value) -> Self {
        let now = Utc::now();
        let node_count = graph
            .get("nodes")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0) as i32;
        let edge_count = graph
            .get("edges")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0) as i32;
        let environment_variables = graph
            .get("environment_variables")
            .cloned()
            .unwrap_or_else(|| json!({}));
        let conversation_variables = graph
            .get("conversation_variables")
            .cloned()
            .unwrap_or_else(|| json!({}));

        Self {
            id: Uuid::new_v4().to_string(),
            bot_id: bot_id.into(),
            version: 1,
            status: "draft".into(),
            graph,
            environment_variables,
            conversation_variables,
            features: json!({}),
            input_schema: None,
            output_schema: None,
            port_definitions: None,
            node_count,
            edge_count,
            created_by: None,
            created_at: now,
            updated_at: now,
            published_at: None,
            is_in_library: false,
            library_title: None,
            library_description: None,
        }
    }

    pub fn is_draft(&self) -> bool {
        self.status == "draft"
    }

    /// Freeze the draft.
    pub fn publish(&mut self) {
        self.status = "published".into();
        self.published_at = Some(Utc::now());
        self.updated_at = Utc::now();
    }
}
