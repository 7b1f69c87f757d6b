//! Queue-driven document ingestion.
//!
//! One message names one uploaded document. The pipeline: mark processing,
//! download, parse, chunk, embed, upsert, mark done, delete the message.
//! Failure disposition follows the error class: parsing and vector-write
//! errors are fatal (status `failed`, message deleted); circuit-open and
//! transient errors leave the message on the queue so the broker redelivers
//! it after the visibility timeout. Chunk-id upsert keeps redelivery
//! idempotent.

use crate::chunking::TextChunker;
use crate::embeddings::EmbeddingService;
use crate::error::{EmbeddingError, WorkerError};
use crate::parser::ParserRegistry;
use crate::store::{VectorRecord, VectorStore};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// One document-processing job, as carried on the upload queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentJob {
    pub document_id: String,
    pub bot_id: String,
    pub user_id: String,
    pub s3_uri: String,
    pub original_filename: String,
    pub file_extension: String,
    #[serde(default)]
    pub retry_count: u32,
}

impl DocumentJob {
    fn is_complete(&self) -> bool {
        !self.document_id.is_empty()
            && !self.bot_id.is_empty()
            && !self.s3_uri.is_empty()
            && !self.original_filename.is_empty()
    }
}

/// A received message: the job plus its broker receipt.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub receipt: String,
    pub job: DocumentJob,
}

/// Message transport (SQS in production, in-memory in tests).
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Long-poll for messages; returns an empty vec on timeout.
    async fn receive(&self, wait: Duration) -> Result<Vec<QueueMessage>, WorkerError>;

    /// Acknowledge and remove a message.
    async fn delete(&self, receipt: &str) -> Result<(), WorkerError>;
}

/// Blob download (S3 in production).
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn download(&self, uri: &str) -> Result<Vec<u8>, WorkerError>;
}

/// Document lifecycle writes (`documents` table).
#[async_trait]
pub trait DocumentStatusStore: Send + Sync {
    async fn mark_processing(&self, document_id: &str) -> Result<(), WorkerError>;

    async fn mark_done(
        &self,
        document_id: &str,
        chunk_count: usize,
        processing_time_sec: u64,
    ) -> Result<(), WorkerError>;

    async fn mark_failed(&self, document_id: &str, error: &str) -> Result<(), WorkerError>;

    /// Back to queued: the circuit is open or the failure is transient.
    async fn mark_queued(&self, document_id: &str, reason: &str) -> Result<(), WorkerError>;
}

/// The long-running consumer.
pub struct EmbeddingWorker {
    queue: Arc<dyn JobQueue>,
    blobs: Arc<dyn BlobStore>,
    documents: Arc<dyn DocumentStatusStore>,
    embeddings: Arc<EmbeddingService>,
    store: Arc<dyn VectorStore>,
    chunker: TextChunker,
    parsers: ParserRegistry,
    poll_wait: Duration,
}

impl EmbeddingWorker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        blobs: Arc<dyn BlobStore>,
        documents: Arc<dyn DocumentStatusStore>,
        embeddings: Arc<EmbeddingService>,
        store: Arc<dyn VectorStore>,
        chunker: TextChunker,
    ) -> Self {
        Self {
            queue,
            blobs,
            documents,
            embeddings,
            store,
            chunker,
            parsers: ParserRegistry::with_defaults(),
            poll_wait: Duration::from_secs(5),
        }
    }

    pub fn with_poll_wait(mut self, wait: Duration) -> Self {
        self.poll_wait = wait;
        self
    }

    /// Consume the queue until shutdown is requested.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("embedding worker started");
        loop {
            let messages = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.queue.receive(self.poll_wait) => match received {
                    Ok(messages) => messages,
                    Err(e) => {
                        error!(error = %e, "queue receive failed");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                },
            };

            for message in messages {
                if shutdown.is_cancelled() {
                    break;
                }
                self.handle_message(&message).await;
            }
        }
        info!("embedding worker stopped");
    }

    /// Process one message and apply its failure disposition.
    pub async fn handle_message(&self, message: &QueueMessage) {
        let job = &message.job;

        // Messages missing required fields can never succeed; drop them.
        if !job.is_complete() {
            warn!(document_id = %job.document_id, "dropping incomplete job message");
            if let Err(e) = self.queue.delete(&message.receipt).await {
                error!(error = %e, "failed to delete malformed message");
            }
            return;
        }

        info!(
            document_id = %job.document_id,
            file = %job.original_filename,
            retry = job.retry_count,
            "processing document"
        );

        match self.process_document(job).await {
            Ok(chunk_count) => {
                info!(document_id = %job.document_id, chunks = chunk_count, "document done");
                if let Err(e) = self.queue.delete(&message.receipt).await {
                    error!(error = %e, "failed to delete processed message");
                }
            }
            Err(e) if e.retains_message() => {
                warn!(document_id = %job.document_id, error = %e, "transient failure, message retained");
                if let Err(status_err) = self
                    .documents
                    .mark_queued(&job.document_id, &e.to_string())
                    .await
                {
                    error!(error = %status_err, "failed to requeue document status");
                }
                // No delete: the broker redelivers after the visibility
                // timeout, or dead-letters past maxReceiveCount.
            }
            Err(e) => {
                error!(document_id = %job.document_id, error = %e, "document failed");
                if let Err(status_err) =
                    self.documents.mark_failed(&job.document_id, &e.to_string()).await
                {
                    error!(error = %status_err, "failed to record document failure");
                }
                if let Err(delete_err) = self.queue.delete(&message.receipt).await {
                    error!(error = %delete_err, "failed to delete failed message");
                }
            }
        }
    }

    /// The pipeline proper. Returns the number of chunks written.
    async fn process_document(&self, job: &DocumentJob) -> Result<usize, WorkerError> {
        let started = Instant::now();
        self.documents.mark_processing(&job.document_id).await?;

        let bytes = self.blobs.download(&job.s3_uri).await?;

        let text = self
            .parsers
            .extract(&job.file_extension, &bytes)
            .map_err(WorkerError::Parsing)?;
        if text.trim().is_empty() {
            return Err(WorkerError::Parsing("document contains no text".into()));
        }

        let chunks = self.chunker.split_text(&text);
        if chunks.is_empty() {
            return Err(WorkerError::Parsing("chunking produced no chunks".into()));
        }

        let embeddings = self
            .embeddings
            .embed_documents(&chunks)
            .await
            .map_err(WorkerError::Embedding)?;
        if embeddings.len() != chunks.len() {
            return Err(WorkerError::Embedding(EmbeddingError::InvalidResponse(
                format!("{} chunks but {} vectors", chunks.len(), embeddings.len()),
            )));
        }

        let created_at = chrono::Utc::now().to_rfc3339();
        let records: Vec<VectorRecord> = chunks
            .iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, (chunk, embedding))| {
                let chunk_id = format!("{}_chunk_{}", job.document_id, i);
                VectorRecord {
                    id: chunk_id.clone(),
                    bot_id: Some(job.bot_id.clone()),
                    user_id: Some(job.user_id.clone()),
                    document_id: job.document_id.clone(),
                    chunk_index: i as i32,
                    chunk_text: chunk.clone(),
                    embedding,
                    metadata: json!({
                        "document_id": job.document_id,
                        "bot_id": job.bot_id,
                        "user_id": job.user_id,
                        "original_filename": job.original_filename,
                        "chunk_index": i,
                        "chunk_id": chunk_id,
                        "created_at": created_at,
                    }),
                }
            })
            .collect();

        self.store.add(&records).await?;

        self.documents
            .mark_done(&job.document_id, records.len(), started.elapsed().as_secs())
            .await?;
        Ok(records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{EmbeddingConfig, MockEmbeddingProvider};
    use crate::store::MemoryVectorStore;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    struct MemoryQueue {
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl JobQueue for MemoryQueue {
        async fn receive(&self, _wait: Duration) -> Result<Vec<QueueMessage>, WorkerError> {
            Ok(Vec::new())
        }

        async fn delete(&self, receipt: &str) -> Result<(), WorkerError> {
            self.deleted.lock().push(receipt.to_string());
            Ok(())
        }
    }

    struct MemoryBlobs {
        files: HashMap<String, Vec<u8>>,
    }

    #[async_trait]
    impl BlobStore for MemoryBlobs {
        async fn download(&self, uri: &str) -> Result<Vec<u8>, WorkerError> {
            self.files
                .get(uri)
                .cloned()
                .ok_or_else(|| WorkerError::Download(format!("missing blob {uri}")))
        }
    }

    #[derive(Default)]
    struct StatusLog {
        events: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DocumentStatusStore for StatusLog {
        async fn mark_processing(&self, document_id: &str) -> Result<(), WorkerError> {
            self.events.lock().push(format!("{document_id}:processing"));
            Ok(())
        }

        async fn mark_done(
            &self,
            document_id: &str,
            chunk_count: usize,
            _processing_time_sec: u64,
        ) -> Result<(), WorkerError> {
            self.events.lock().push(format!("{document_id}:done:{chunk_count}"));
            Ok(())
        }

        async fn mark_failed(&self, document_id: &str, _error: &str) -> Result<(), WorkerError> {
            self.events.lock().push(format!("{document_id}:failed"));
            Ok(())
        }

        async fn mark_queued(&self, document_id: &str, _reason: &str) -> Result<(), WorkerError> {
            self.events.lock().push(format!("{document_id}:queued"));
            Ok(())
        }
    }

    fn worker(
        files: HashMap<String, Vec<u8>>,
    ) -> (EmbeddingWorker, Arc<MemoryQueue>, Arc<StatusLog>, Arc<MemoryVectorStore>) {
        let queue = Arc::new(MemoryQueue { deleted: Mutex::new(Vec::new()) });
        let status = Arc::new(StatusLog::default());
        let store = Arc::new(MemoryVectorStore::new());
        let embeddings = Arc::new(EmbeddingService::new(
            Arc::new(MockEmbeddingProvider::new(32)),
            EmbeddingConfig { request_interval_ms: 1, ..Default::default() },
        ));
        let worker = EmbeddingWorker::new(
            queue.clone(),
            Arc::new(MemoryBlobs { files }),
            status.clone(),
            embeddings,
            store.clone(),
            TextChunker::new(64, 16),
        );
        (worker, queue, status, store)
    }

    fn job() -> DocumentJob {
        DocumentJob {
            document_id: "doc-1".into(),
            bot_id: "bot-1".into(),
            user_id: "user-1".into(),
            s3_uri: "s3://bucket/doc-1.txt".into(),
            original_filename: "notes.txt".into(),
            file_extension: "txt".into(),
            retry_count: 0,
        }
    }

    #[tokio::test]
    async fn pipeline_chunks_embeds_and_marks_done() {
        let mut files = HashMap::new();
        files.insert(
            "s3://bucket/doc-1.txt".to_string(),
            "파이썬은 고급 언어입니다. 파이썬은 간결합니다. ".repeat(5).into_bytes(),
        );
        let (worker, queue, status, store) = worker(files);

        let message = QueueMessage { receipt: "r1".into(), job: job() };
        worker.handle_message(&message).await;

        let events = status.events.lock().clone();
        assert_eq!(events[0], "doc-1:processing");
        assert!(events[1].starts_with("doc-1:done:"));
        assert!(store.len() > 0);
        assert!(queue.deleted.lock().contains(&"r1".to_string()));

        // Chunk ids follow the contract.
        assert!(store.get("doc-1_chunk_0").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn empty_document_fails_and_deletes_message() {
        let mut files = HashMap::new();
        files.insert("s3://bucket/doc-1.txt".to_string(), b"   ".to_vec());
        let (worker, queue, status, store) = worker(files);

        let message = QueueMessage { receipt: "r1".into(), job: job() };
        worker.handle_message(&message).await;

        let events = status.events.lock().clone();
        assert!(events.iter().any(|e| e == "doc-1:failed"));
        assert!(store.is_empty());
        assert!(queue.deleted.lock().contains(&"r1".to_string()));
    }

    #[tokio::test]
    async fn missing_blob_retains_message() {
        let (worker, queue, status, _store) = worker(HashMap::new());

        let message = QueueMessage { receipt: "r1".into(), job: job() };
        worker.handle_message(&message).await;

        let events = status.events.lock().clone();
        assert!(events.iter().any(|e| e == "doc-1:queued"));
        assert!(queue.deleted.lock().is_empty());
    }

    #[tokio::test]
    async fn incomplete_message_is_dropped() {
        let (worker, queue, status, _store) = worker(HashMap::new());

        let mut bad = job();
        bad.document_id = String::new();
        let message = QueueMessage { receipt: "r1".into(), job: bad };
        worker.handle_message(&message).await;

        assert!(status.events.lock().is_empty());
        assert!(queue.deleted.lock().contains(&"r1".to_string()));
    }

    #[tokio::test]
    async fn reprocessing_is_idempotent() {
        let mut files = HashMap::new();
        files.insert(
            "s3://bucket/doc-1.txt".to_string(),
            "같은 문서를 두 번 처리해도 결과는 같아야 합니다.".repeat(4).into_bytes(),
        );
        let (worker, _queue, _status, store) = worker(files);

        let message = QueueMessage { receipt: "r1".into(), job: job() };
        worker.handle_message(&message).await;
        let first_count = store.len();

        // Redelivery of the same message.
        let message = QueueMessage { receipt: "r2".into(), job: job() };
        worker.handle_message(&message).await;
        assert_eq!(store.len(), first_count);
    }
}
