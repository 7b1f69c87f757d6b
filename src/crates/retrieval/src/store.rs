//! Tenant-scoped vector storage with cosine top-k search.
//!
//! Two implementations: Postgres + pgvector for production (HNSW cosine
//! index on `document_embeddings.embedding`) and an in-memory store for
//! tests and offline development. Chunk ids follow the
//! `"<document_id>_chunk_<i>"` contract, and `add` upserts by id so queue
//! redelivery stays idempotent.

use crate::cosine_similarity;
use crate::error::StoreError;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use sqlx::postgres::PgPool;
use sqlx::Row;
use std::collections::HashMap;
use tracing::debug;

/// One stored chunk.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    /// `"<document_id>_chunk_<i>"`
    pub id: String,
    pub bot_id: Option<String>,
    pub user_id: Option<String>,
    pub document_id: String,
    pub chunk_index: i32,
    pub chunk_text: String,
    pub embedding: Vec<f32>,
    pub metadata: Value,
}

/// Tenant and document filters for search.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub bot_id: Option<String>,
    pub user_id: Option<String>,
    pub document_ids: Option<Vec<String>>,
}

impl SearchFilter {
    fn matches(&self, record: &VectorRecord) -> bool {
        if let Some(bot_id) = &self.bot_id {
            if record.bot_id.as_deref() != Some(bot_id) {
                return false;
            }
        }
        if let Some(user_id) = &self.user_id {
            if record.user_id.as_deref() != Some(user_id) {
                return false;
            }
        }
        if let Some(document_ids) = &self.document_ids {
            if !document_ids.iter().any(|d| d == &record.document_id) {
                return false;
            }
        }
        true
    }
}

/// One search hit. `score` is cosine similarity in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub id: String,
    pub text: String,
    pub metadata: Value,
    pub score: f64,
}

/// Vector storage contract.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Upsert records by id; idempotent per chunk id.
    async fn add(&self, records: &[VectorRecord]) -> Result<(), StoreError>;

    /// Top-k by descending cosine similarity. An empty store returns an
    /// empty result, not an error.
    async fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredChunk>, StoreError>;

    /// Delete all chunks of a document; returns the number removed.
    async fn delete_document(&self, document_id: &str) -> Result<u64, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<VectorRecord>, StoreError>;
}

/// In-memory store for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryVectorStore {
    records: RwLock<HashMap<String, VectorRecord>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn add(&self, records: &[VectorRecord]) -> Result<(), StoreError> {
        let mut map = self.records.write();
        for record in records {
            map.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        let map = self.records.read();
        let mut scored: Vec<ScoredChunk> = map
            .values()
            .filter(|r| filter.matches(r))
            .map(|r| ScoredChunk {
                id: r.id.clone(),
                text: r.chunk_text.clone(),
                metadata: r.metadata.clone(),
                score: cosine_similarity(query_embedding, &r.embedding),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete_document(&self, document_id: &str) -> Result<u64, StoreError> {
        let mut map = self.records.write();
        let before = map.len();
        map.retain(|_, r| r.document_id != document_id);
        Ok((before - map.len()) as u64)
    }

    async fn get(&self, id: &str) -> Result<Option<VectorRecord>, StoreError> {
        Ok(self.records.read().get(id).cloned())
    }
}

/// Postgres + pgvector store over the `document_embeddings` table.
pub struct PgVectorStore {
    pool: PgPool,
}

impl PgVectorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// pgvector literal: `[0.1,0.2,...]`.
    fn vector_literal(embedding: &[f32]) -> String {
        let mut literal = String::with_capacity(embedding.len() * 10 + 2);
        literal.push('[');
        for (i, value) in embedding.iter().enumerate() {
            if i > 0 {
                literal.push(',');
            }
            literal.push_str(&value.to_string());
        }
        literal.push(']');
        literal
    }
}

#[async_trait]
impl VectorStore for PgVectorStore {
    async fn add(&self, records: &[VectorRecord]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                "INSERT INTO document_embeddings
                     (id, bot_id, user_id, document_id, chunk_index, chunk_text,
                      embedding, metadata, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7::vector, $8, now(), now())
                 ON CONFLICT (id) DO UPDATE SET
                     chunk_text = EXCLUDED.chunk_text,
                     embedding = EXCLUDED.embedding,
                     metadata = EXCLUDED.metadata,
                     updated_at = now()",
            )
            .bind(&record.id)
            .bind(&record.bot_id)
            .bind(&record.user_id)
            .bind(&record.document_id)
            .bind(record.chunk_index)
            .bind(&record.chunk_text)
            .bind(Self::vector_literal(&record.embedding))
            .bind(&record.metadata)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!(records = records.len(), "upserted embeddings");
        Ok(())
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        let literal = Self::vector_literal(query_embedding);
        let rows = sqlx::query(
            "SELECT id, chunk_text, metadata,
                    1 - (embedding <=> $1::vector) AS score
             FROM document_embeddings
             WHERE ($2::text IS NULL OR bot_id = $2)
               AND ($3::text IS NULL OR user_id = $3)
               AND ($4::text[] IS NULL OR document_id = ANY($4))
             ORDER BY embedding <=> $1::vector
             LIMIT $5",
        )
        .bind(&literal)
        .bind(&filter.bot_id)
        .bind(&filter.user_id)
        .bind(&filter.document_ids)
        .bind(top_k as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ScoredChunk {
                id: row.get("id"),
                text: row.get("chunk_text"),
                metadata: row.get("metadata"),
                score: row.get::<f64, _>("score").clamp(0.0, 1.0),
            })
            .collect())
    }

    async fn delete_document(&self, document_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM document_embeddings WHERE document_id = $1")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn get(&self, id: &str) -> Result<Option<VectorRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT id, bot_id, user_id, document_id, chunk_index, chunk_text,
                    embedding::text AS embedding, metadata
             FROM document_embeddings WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            let embedding_text: String = row.get("embedding");
            VectorRecord {
                id: row.get("id"),
                bot_id: row.get("bot_id"),
                user_id: row.get("user_id"),
                document_id: row.get("document_id"),
                chunk_index: row.get("chunk_index"),
                chunk_text: row.get("chunk_text"),
                embedding: parse_vector_literal(&embedding_text),
                metadata: row.get("metadata"),
            }
        }))
    }
}

fn parse_vector_literal(literal: &str) -> Vec<f32> {
    literal
        .trim_matches(|c| c == '[' || c == ']')
        .split(',')
        .filter_map(|v| v.trim().parse().ok())
        .collect()
}
