//! Embedding, vector search, and document ingestion for flowgraph.
//!
//! This crate owns the retrieval side of the platform:
//!
//! - [`embeddings`]: provider-abstracted text-to-vector client with a token
//!   bucket, circuit breaker, classified retry, and a deterministic mock.
//! - [`store`]: tenant-scoped vector storage (pgvector or in-memory) with
//!   cosine top-k search.
//! - [`chunking`]: the recursive character splitter used before embedding.
//! - [`parser`]: extension-dispatched text extraction (txt/md, PDF, DOCX).
//! - [`worker`]: the queue-driven pipeline that turns uploaded documents
//!   into searchable chunks.
//! - [`cache`]: the similarity-keyed LLM response cache.
//! - [`retriever`]: the query-side glue implementing the engine's
//!   retrieval contract.

pub mod cache;
pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod parser;
pub mod retriever;
pub mod store;
pub mod worker;

pub use cache::{SemanticCache, SemanticCacheConfig};
pub use chunking::TextChunker;
pub use embeddings::{
    EmbeddingConfig, EmbeddingProvider, EmbeddingService, HttpEmbeddingProvider,
    MockEmbeddingProvider,
};
pub use error::{EmbeddingError, StoreError, WorkerError};
pub use parser::ParserRegistry;
pub use retriever::VectorRetriever;
pub use store::{MemoryVectorStore, PgVectorStore, ScoredChunk, SearchFilter, VectorRecord, VectorStore};
pub use worker::{BlobStore, DocumentJob, DocumentStatusStore, EmbeddingWorker, JobQueue};

/// Cosine similarity of two vectors, mapped into `[0, 1]`-ish range used
/// across the crate (`1` = identical direction, `0` = orthogonal or
/// degenerate).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
