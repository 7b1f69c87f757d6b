//! Error types for the retrieval subsystem.

use thiserror::Error;
use utils::CircuitOpenError;

/// Embedding call failures.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The circuit breaker is open; callers should retry later. The worker
    /// treats this as "leave the message on the queue".
    #[error("embedding circuit open: {0}")]
    CircuitOpen(#[from] CircuitOpenError),

    /// Authentication/authorization failure; never retried.
    #[error("embedding auth failed: {0}")]
    Auth(String),

    /// Provider rate limit; retried with backoff.
    #[error("embedding rate limited: {0}")]
    RateLimited(String),

    /// The provider returned something unusable.
    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    /// Transport or catch-all provider error.
    #[error("embedding API error: {0}")]
    Api(String),
}

impl EmbeddingError {
    /// Only rate-limit-class errors are retried in place.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EmbeddingError::RateLimited(_) | EmbeddingError::Api(_))
    }
}

/// Vector store failures.
#[derive(Debug, Error)]
#[error("vector store error: {0}")]
pub struct StoreError(pub String);

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError(err.to_string())
    }
}

/// Document worker failures, classified by disposition.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Fatal for the document: status becomes `failed`, message deleted.
    #[error("document parsing failed: {0}")]
    Parsing(String),

    /// Fatal for the document.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Transient: the message is retained for redelivery.
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    /// Transient: blob download failed.
    #[error("document download failed: {0}")]
    Download(String),

    /// Queue transport failure.
    #[error("queue error: {0}")]
    Queue(String),
}

impl WorkerError {
    /// Whether the message should stay on the queue for redelivery.
    pub fn retains_message(&self) -> bool {
        match self {
            WorkerError::Embedding(EmbeddingError::CircuitOpen(_)) => true,
            WorkerError::Download(_) | WorkerError::Queue(_) => true,
            WorkerError::Embedding(e) => e.is_retryable(),
            WorkerError::Parsing(_) | WorkerError::Store(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispositions() {
        assert!(!WorkerError::Parsing("empty".into()).retains_message());
        assert!(!WorkerError::Store(StoreError("down".into())).retains_message());
        assert!(WorkerError::Download("timeout".into()).retains_message());
        assert!(
            WorkerError::Embedding(EmbeddingError::RateLimited("429".into())).retains_message()
        );
        assert!(!WorkerError::Embedding(EmbeddingError::Auth("401".into())).retains_message());
    }
}
