//! Service contracts injected into node handlers.
//!
//! Process-scoped services (LLM client, retriever, web search, session
//! store, response cache, event publisher) are constructed at startup and
//! passed into the executor explicitly; no ambient globals. Handlers reach
//! them through [`Services`] on the node context.

use crate::llm::LanguageModel;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use utils::TokenBucket;

/// One retrieved chunk with its similarity score.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub id: String,
    pub content: String,
    pub metadata: Value,
    /// Cosine similarity in `[0, 1]`, higher = more similar
    pub score: f64,
}

/// Tenant and document filters for retrieval.
#[derive(Debug, Clone, Default)]
pub struct RetrievalFilter {
    pub bot_id: Option<String>,
    pub user_id: Option<String>,
    pub document_ids: Option<Vec<String>>,
}

#[derive(Debug, Error)]
#[error("retrieval failed: {0}")]
pub struct RetrievalError(pub String);

/// Query-side retrieval: embed the query and search the tenant's vectors.
#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filter: &RetrievalFilter,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError>;
}

/// Web search request parameters (Tavily-shaped).
#[derive(Debug, Clone)]
pub struct WebSearchParams {
    pub topic: String,
    pub search_depth: String,
    pub max_results: usize,
    pub include_domains: Vec<String>,
    pub exclude_domains: Vec<String>,
    pub time_range: Option<String>,
}

impl Default for WebSearchParams {
    fn default() -> Self {
        Self {
            topic: "general".into(),
            search_depth: "basic".into(),
            max_results: 5,
            include_domains: Vec::new(),
            exclude_domains: Vec::new(),
            time_range: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebSearchResult {
    pub title: String,
    pub url: String,
    pub content: String,
    pub score: f64,
}

#[derive(Debug, Clone, Default)]
pub struct WebSearchResponse {
    pub results: Vec<WebSearchResult>,
    pub answer: Option<String>,
}

/// Web search failures; 401/429/432 map to distinct kinds.
#[derive(Debug, Clone, Error)]
pub enum WebSearchError {
    #[error("web search authentication failed: {0}")]
    Auth(String),
    #[error("web search rate limited: {0}")]
    RateLimited(String),
    #[error("web search quota exhausted: {0}")]
    QuotaExhausted(String),
    #[error("web search failed: {0}")]
    Api(String),
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(
        &self,
        query: &str,
        params: &WebSearchParams,
    ) -> Result<WebSearchResponse, WebSearchError>;
}

#[derive(Debug, Error)]
#[error("session store error: {0}")]
pub struct SessionStoreError(pub String);

/// Conversation variables, keyed by `(bot_id, session_id, key)` in the
/// backing store. Writes from concurrent runs of one session are serialized
/// by the implementation.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(
        &self,
        bot_id: &str,
        session_id: &str,
    ) -> Result<Map<String, Value>, SessionStoreError>;

    async fn set(
        &self,
        bot_id: &str,
        session_id: &str,
        key: &str,
        value: &Value,
    ) -> Result<(), SessionStoreError>;
}

/// Metadata key for the semantic response cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheMeta {
    pub provider: String,
    pub model: String,
    pub system_prompt_hash: String,
    /// Temperature bucketed to two decimals (x100)
    pub temperature_bucket: i64,
    pub max_tokens_bucket: i64,
    pub context_hash: Option<String>,
}

/// Similarity-keyed LLM response cache.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// Returns the cached response for a semantically similar prompt, if any.
    async fn lookup(&self, prompt: &str, meta: &CacheMeta) -> Option<String>;

    /// Store a response; failures are swallowed by the implementation.
    async fn store(&self, prompt: &str, response: &str, meta: &CacheMeta);
}

/// Fire-and-forget event sink for run logs.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: Value);
}

/// Plain HTTP fetch for the http-request node.
#[derive(Debug, Clone)]
pub struct HttpResponseData {
    pub status: u16,
    pub body: String,
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Error)]
#[error("http request failed: {0}")]
pub struct HttpFetchError(pub String);

#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn fetch(
        &self,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        body: Option<&Value>,
    ) -> Result<HttpResponseData, HttpFetchError>;
}

/// Lazily-wired service handles available to node handlers.
///
/// Every field is optional except the session store; a handler that needs a
/// missing service fails its node with a configuration error rather than
/// panicking.
#[derive(Clone)]
pub struct Services {
    pub llm: Option<Arc<dyn LanguageModel>>,
    pub retriever: Option<Arc<dyn KnowledgeRetriever>>,
    pub web_search: Option<Arc<dyn WebSearch>>,
    pub session_store: Arc<dyn SessionStore>,
    pub response_cache: Option<Arc<dyn ResponseCache>>,
    pub events: Option<Arc<dyn EventPublisher>>,
    pub http: Option<Arc<dyn HttpFetcher>>,
    /// Token bucket gating LLM dispatch; cache hits bypass it
    pub llm_rate_limiter: Option<Arc<TokenBucket>>,
}

impl Services {
    pub fn new(session_store: Arc<dyn SessionStore>) -> Self {
        Self {
            llm: None,
            retriever: None,
            web_search: None,
            session_store,
            response_cache: None,
            events: None,
            http: None,
            llm_rate_limiter: None,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LanguageModel>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn KnowledgeRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn with_web_search(mut self, web_search: Arc<dyn WebSearch>) -> Self {
        self.web_search = Some(web_search);
        self
    }

    pub fn with_response_cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.response_cache = Some(cache);
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_http(mut self, http: Arc<dyn HttpFetcher>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn with_llm_rate_limiter(mut self, bucket: Arc<TokenBucket>) -> Self {
        self.llm_rate_limiter = Some(bucket);
        self
    }
}

/// In-memory session store for tests and single-process deployments.
#[derive(Default)]
pub struct MemorySessionStore {
    entries: parking_lot::Mutex<HashMap<(String, String), Map<String, Value>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(
        &self,
        bot_id: &str,
        session_id: &str,
    ) -> Result<Map<String, Value>, SessionStoreError> {
        let entries = self.entries.lock();
        Ok(entries
            .get(&(bot_id.to_string(), session_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn set(
        &self,
        bot_id: &str,
        session_id: &str,
        key: &str,
        value: &Value,
    ) -> Result<(), SessionStoreError> {
        let mut entries = self.entries.lock();
        entries
            .entry((bot_id.to_string(), session_id.to_string()))
            .or_default()
            .insert(key.to_string(), value.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_session_store_round_trip() {
        let store = MemorySessionStore::new();
        store
            .set("bot-1", "sess-1", "stage", &json!("wait_feedback"))
            .await
            .unwrap();

        let loaded = store.load("bot-1", "sess-1").await.unwrap();
        assert_eq!(loaded["stage"], json!("wait_feedback"));

        // Other sessions are isolated.
        let other = store.load("bot-1", "sess-2").await.unwrap();
        assert!(other.is_empty());
    }
}
