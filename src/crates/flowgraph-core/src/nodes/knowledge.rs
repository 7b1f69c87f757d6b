//! Knowledge-retrieval node: semantic search over the tenant's documents.

use crate::node::{NodeContext, NodeExecutionResult, NodeHandler, NodeSchema};
use crate::schema::{NodeDef, NodeKind, Port, PortType};
use crate::services::RetrievalFilter;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

const DEFAULT_TOP_K: usize = 5;
const MAX_TOP_K: usize = 20;

/// Embeds the query, searches the vector store, and emits the top-k chunks
/// as a single `context` string plus structured `retrieved_documents`.
pub struct KnowledgeRetrievalNode {
    id: String,
    top_k: usize,
    mode: String,
    document_ids: Option<Vec<String>>,
}

impl KnowledgeRetrievalNode {
    pub fn from_def(def: &NodeDef) -> Result<Box<dyn NodeHandler>, String> {
        let top_k = def
            .config
            .get("top_k")
            .and_then(Value::as_u64)
            .map(|k| k as usize)
            .unwrap_or(DEFAULT_TOP_K)
            .clamp(1, MAX_TOP_K);

        let document_ids = def.config.get("document_ids").and_then(|v| {
            v.as_array().map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
        });

        Ok(Box::new(KnowledgeRetrievalNode {
            id: def.id.clone(),
            top_k,
            mode: def.config_str("mode").unwrap_or("semantic").to_string(),
            document_ids,
        }))
    }

    pub fn schema() -> NodeSchema {
        NodeSchema {
            kind: NodeKind::KnowledgeRetrieval,
            label: "Knowledge Retrieval",
            icon: "book",
            max_instances: -1,
            configurable: true,
            inputs: vec![Port::new("query", PortType::String)],
            outputs: vec![
                Port::new("context", PortType::String),
                Port::new("retrieved_documents", PortType::Array),
            ],
        }
    }
}

#[async_trait]
impl NodeHandler for KnowledgeRetrievalNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::KnowledgeRetrieval
    }

    fn schema(&self) -> NodeSchema {
        Self::schema()
    }

    fn validate_static(&self) -> Result<(), String> {
        if self.mode != "semantic" {
            return Err(format!("unsupported retrieval mode '{}'", self.mode));
        }
        Ok(())
    }

    async fn execute(
        &self,
        ctx: &mut NodeContext<'_>,
        inputs: &Map<String, Value>,
    ) -> NodeExecutionResult {
        let Some(retriever) = ctx.services.retriever.clone() else {
            return NodeExecutionResult::failure(
                "configuration_error",
                "no knowledge retriever configured",
            );
        };

        let query = inputs
            .get("query")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let filter = RetrievalFilter {
            bot_id: Some(ctx.run.bot_id.clone()),
            user_id: None,
            document_ids: self.document_ids.clone(),
        };

        let chunks = match retriever.retrieve(query, self.top_k, &filter).await {
            Ok(chunks) => chunks,
            Err(e) => return NodeExecutionResult::failure("vector_store_error", e.to_string()),
        };
        debug!(node = %self.id, count = chunks.len(), "retrieved chunks");

        let context = chunks
            .iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let retrieved: Vec<Value> = chunks
            .iter()
            .map(|c| {
                let mut doc = Map::new();
                doc.insert("content".into(), Value::String(c.content.clone()));
                doc.insert("metadata".into(), c.metadata.clone());
                doc.insert(
                    "score".into(),
                    serde_json::Number::from_f64(c.score)
                        .map(Value::Number)
                        .unwrap_or(Value::Null),
                );
                Value::Object(doc)
            })
            .collect();

        let mut outputs = Map::new();
        outputs.insert("context".into(), Value::String(context));
        outputs.insert("retrieved_documents".into(), Value::Array(retrieved));
        NodeExecutionResult::success(outputs)
    }
}
