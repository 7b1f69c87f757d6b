//! Document lifecycle persistence, including the worker's status-store
//! contract.

use crate::db::connection::DatabasePool;
use crate::db::models::{Document, DocumentStatus};
use async_trait::async_trait;
use chrono::Utc;
use retrieval::worker::DocumentStatusStore;
use retrieval::WorkerError;

/// Repository for `documents`.
pub struct DocumentRepository;

impl DocumentRepository {
    pub async fn insert(pool: &DatabasePool, document: &Document) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO documents
                 (document_id, bot_id, user_id, filename, size, status, retry_count,
                  created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&document.document_id)
        .bind(&document.bot_id)
        .bind(&document.user_id)
        .bind(&document.filename)
        .bind(document.size)
        .bind(&document.status)
        .bind(document.retry_count)
        .bind(document.created_at)
        .bind(document.updated_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn get(
        pool: &DatabasePool,
        document_id: &str,
    ) -> Result<Option<Document>, sqlx::Error> {
        sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE document_id = $1")
            .bind(document_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn update_status(
        pool: &DatabasePool,
        document_id: &str,
        status: DocumentStatus,
        error_message: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE documents
             SET status = $2, error_message = $3, updated_at = now()
             WHERE document_id = $1",
        )
        .bind(document_id)
        .bind(status.as_str())
        .bind(error_message)
        .execute(pool)
        .await?;
        Ok(())
    }
}

/// `DocumentStatusStore` over Postgres, used by the embedding worker.
pub struct PgDocumentStatusStore {
    pool: DatabasePool,
}

impl PgDocumentStatusStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn db_err(e: sqlx::Error) -> WorkerError {
    WorkerError::Queue(format!("document status write failed: {e}"))
}

#[async_trait]
impl DocumentStatusStore for PgDocumentStatusStore {
    async fn mark_processing(&self, document_id: &str) -> Result<(), WorkerError> {
        sqlx::query(
            "UPDATE documents
             SET status = 'processing', processing_started_at = $2, updated_at = now()
             WHERE document_id = $1",
        )
        .bind(document_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn mark_done(
        &self,
        document_id: &str,
        chunk_count: usize,
        processing_time_sec: u64,
    ) -> Result<(), WorkerError> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE documents
             SET status = 'done', chunk_count = $2, embedded_at = $3, completed_at = $3,
                 processing_time_sec = $4, error_message = NULL, updated_at = now()
             WHERE document_id = $1",
        )
        .bind(document_id)
        .bind(chunk_count as i32)
        .bind(now)
        .bind(processing_time_sec as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn mark_failed(&self, document_id: &str, error: &str) -> Result<(), WorkerError> {
        sqlx::query(
            "UPDATE documents
             SET status = 'failed', error_message = $2, completed_at = $3, updated_at = now()
             WHERE document_id = $1",
        )
        .bind(document_id)
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn mark_queued(&self, document_id: &str, reason: &str) -> Result<(), WorkerError> {
        sqlx::query(
            "UPDATE documents
             SET status = 'queued', error_message = $2,
                 retry_count = retry_count + 1, updated_at = now()
             WHERE document_id = $1",
        )
        .bind(document_id)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}
