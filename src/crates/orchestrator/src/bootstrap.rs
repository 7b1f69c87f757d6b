//! Process-start wiring: settings into services.
//!
//! Constructs the process-scoped singletons (embedding service, semantic
//! cache, LLM registry, rate buckets) once and hands them to the engine as
//! an explicit [`Services`] value.

use crate::config::Settings;
use crate::db::DatabasePool;
use crate::http::ReqwestFetcher;
use crate::session::PgSessionStore;
use crate::{OrchestratorError, Result};
use flowgraph_core::services::{MemorySessionStore, Services, SessionStore};
use llm::ProviderRegistry;
use retrieval::embeddings::{EmbeddingProvider, EmbeddingService, HttpEmbeddingProvider, MockEmbeddingProvider};
use retrieval::{MemoryVectorStore, PgVectorStore, SemanticCache, VectorRetriever, VectorStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use utils::TokenBucket;

/// Build the embedding service from settings.
pub fn build_embedding_service(settings: &Settings) -> Result<Arc<EmbeddingService>> {
    let provider: Arc<dyn EmbeddingProvider> = match settings.embedding.provider.as_str() {
        "mock" => Arc::new(MockEmbeddingProvider::new(settings.embedding.dimensions)),
        "http" => Arc::new(
            HttpEmbeddingProvider::new(
                settings.embedding.base_url.clone(),
                settings.embedding.api_key.clone(),
                settings.embedding.model.clone(),
                settings.embedding.dimensions,
            )
            .map_err(|e| OrchestratorError::Configuration(e.to_string()))?,
        ),
        other => {
            return Err(OrchestratorError::Configuration(format!(
                "unknown embedding provider '{other}'"
            )))
        }
    };
    Ok(Arc::new(EmbeddingService::new(
        provider,
        settings.embedding.service.clone(),
    )))
}

/// Assemble the full service context.
///
/// With a database pool, conversation state and vectors live in Postgres;
/// without one, everything stays in memory (tests, single-process dev).
pub fn build_services(settings: &Settings, pool: Option<DatabasePool>) -> Result<Arc<Services>> {
    let embeddings = build_embedding_service(settings)?;

    let vector_store: Arc<dyn VectorStore> = match &pool {
        Some(pool) => Arc::new(PgVectorStore::new(pool.clone())),
        None => Arc::new(MemoryVectorStore::new()),
    };
    let session_store: Arc<dyn SessionStore> = match &pool {
        Some(pool) => Arc::new(PgSessionStore::new(pool.clone())),
        None => Arc::new(MemorySessionStore::new()),
    };

    let retriever = Arc::new(VectorRetriever::new(embeddings.clone(), vector_store));

    let mut services = Services::new(session_store).with_retriever(retriever);

    match ProviderRegistry::from_settings(&settings.llm) {
        Ok(registry) => {
            services = services.with_llm(Arc::new(registry));
        }
        Err(e) => {
            warn!(error = %e, "no LLM provider wired; llm nodes will fail");
        }
    }

    if settings.semantic_cache.enabled {
        services = services.with_response_cache(Arc::new(SemanticCache::new(
            embeddings,
            settings.semantic_cache.clone(),
        )));
    }

    if settings.rate_limit.bedrock_qps > 0.0 {
        services = services.with_llm_rate_limiter(Arc::new(TokenBucket::with_burst(
            settings.rate_limit.bedrock_qps,
            settings.rate_limit.bedrock_burst,
        )));
    }

    let fetcher = ReqwestFetcher::new(Duration::from_secs(30))
        .map_err(|e| OrchestratorError::Configuration(e.to_string()))?;
    services = services.with_http(Arc::new(fetcher));

    info!("service context assembled");
    Ok(Arc::new(services))
}
