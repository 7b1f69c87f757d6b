//! Query-side retrieval: embed the query, search the store.

use crate::embeddings::EmbeddingService;
use crate::store::{SearchFilter, VectorStore};
use async_trait::async_trait;
use flowgraph_core::services::{
    KnowledgeRetriever, RetrievalError, RetrievalFilter, RetrievedChunk,
};
use std::sync::Arc;
use tracing::debug;

/// Implements the engine's retrieval contract over the embedding service
/// and a vector store.
pub struct VectorRetriever {
    embeddings: Arc<EmbeddingService>,
    store: Arc<dyn VectorStore>,
}

impl VectorRetriever {
    pub fn new(embeddings: Arc<EmbeddingService>, store: Arc<dyn VectorStore>) -> Self {
        Self { embeddings, store }
    }
}

#[async_trait]
impl KnowledgeRetriever for VectorRetriever {
    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filter: &RetrievalFilter,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        let embedding = self
            .embeddings
            .embed_query(query)
            .await
            .map_err(|e| RetrievalError(e.to_string()))?;

        let store_filter = SearchFilter {
            bot_id: filter.bot_id.clone(),
            user_id: filter.user_id.clone(),
            document_ids: filter.document_ids.clone(),
        };
        let hits = self
            .store
            .search(&embedding, top_k, &store_filter)
            .await
            .map_err(|e| RetrievalError(e.to_string()))?;
        debug!(query_len = query.len(), hits = hits.len(), "retrieval done");

        Ok(hits
            .into_iter()
            .map(|hit| RetrievedChunk {
                id: hit.id,
                content: hit.text,
                metadata: hit.metadata,
                score: hit.score,
            })
            .collect())
    }
}
