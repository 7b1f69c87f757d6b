//! Test doubles for the service contracts.
//!
//! Used by this crate's handler tests and by downstream integration suites.
//! Nothing here touches the network.

use crate::llm::{
    ChunkStream, GenerateOptions, Generation, LanguageModel, LlmError, LlmResult, Message,
    StreamChunk, Usage,
};
use crate::node::RunInfo;
use crate::services::{
    KnowledgeRetriever, RetrievalError, RetrievalFilter, RetrievedChunk, Services, WebSearch,
    WebSearchError, WebSearchParams, WebSearchResponse, WebSearchResult,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

/// Language model returning a fixed response, streamed word by word.
pub struct StaticModel {
    pub response: String,
    pub calls: Mutex<Vec<Vec<Message>>>,
}

impl StaticModel {
    pub fn new(response: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            response: response.into(),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl LanguageModel for StaticModel {
    fn provider_name(&self) -> &str {
        "static"
    }

    async fn generate(
        &self,
        messages: &[Message],
        _opts: &GenerateOptions,
    ) -> LlmResult<Generation> {
        self.calls.lock().push(messages.to_vec());
        let prompt_len: usize = messages.iter().map(|m| m.content.len()).sum();
        Ok(Generation {
            text: self.response.clone(),
            usage: Usage::new((prompt_len / 4).max(1) as u64, (self.response.len() / 4).max(1) as u64),
        })
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        opts: &GenerateOptions,
    ) -> LlmResult<ChunkStream> {
        let generation = self.generate(messages, opts).await?;
        let words: Vec<String> = generation
            .text
            .split_inclusive(' ')
            .map(|w| w.to_string())
            .collect();
        let usage = generation.usage;
        let last = words.len().saturating_sub(1);

        let chunks: Vec<LlmResult<StreamChunk>> = words
            .into_iter()
            .enumerate()
            .map(|(i, delta)| {
                Ok(StreamChunk {
                    delta,
                    usage: (i == last).then_some(usage),
                })
            })
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

/// Language model that fails a configurable number of times before
/// succeeding. Used to exercise retry paths.
pub struct FlakyModel {
    pub failures_remaining: Mutex<u32>,
    pub error: LlmError,
    pub response: String,
}

impl FlakyModel {
    pub fn new(failures: u32, error: LlmError, response: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            failures_remaining: Mutex::new(failures),
            error,
            response: response.into(),
        })
    }
}

#[async_trait]
impl LanguageModel for FlakyModel {
    fn provider_name(&self) -> &str {
        "flaky"
    }

    async fn generate(
        &self,
        _messages: &[Message],
        _opts: &GenerateOptions,
    ) -> LlmResult<Generation> {
        let mut remaining = self.failures_remaining.lock();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(self.error.clone());
        }
        Ok(Generation {
            text: self.response.clone(),
            usage: Usage::new(1, 1),
        })
    }
}

/// Retriever returning canned chunks regardless of the query.
pub struct StaticRetriever {
    pub chunks: Vec<RetrievedChunk>,
}

impl StaticRetriever {
    pub fn new(texts: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            chunks: texts
                .iter()
                .enumerate()
                .map(|(i, text)| RetrievedChunk {
                    id: format!("doc_chunk_{i}"),
                    content: text.to_string(),
                    metadata: serde_json::json!({"chunk_index": i}),
                    score: 0.95 - i as f64 * 0.05,
                })
                .collect(),
        })
    }
}

#[async_trait]
impl KnowledgeRetriever for StaticRetriever {
    async fn retrieve(
        &self,
        _query: &str,
        top_k: usize,
        _filter: &RetrievalFilter,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        Ok(self.chunks.iter().take(top_k).cloned().collect())
    }
}

/// Web search returning canned results.
pub struct StaticWebSearch {
    pub response: WebSearchResponse,
    pub error: Option<WebSearchError>,
}

impl StaticWebSearch {
    pub fn new(contents: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            response: WebSearchResponse {
                results: contents
                    .iter()
                    .enumerate()
                    .map(|(i, content)| WebSearchResult {
                        title: format!("Result {i}"),
                        url: format!("https://example.com/{i}"),
                        content: content.to_string(),
                        score: 0.9,
                    })
                    .collect(),
                answer: None,
            },
            error: None,
        })
    }

    pub fn failing(error: WebSearchError) -> Arc<Self> {
        Arc::new(Self {
            response: WebSearchResponse::default(),
            error: Some(error),
        })
    }
}

#[async_trait]
impl WebSearch for StaticWebSearch {
    async fn search(
        &self,
        _query: &str,
        _params: &WebSearchParams,
    ) -> Result<WebSearchResponse, WebSearchError> {
        match &self.error {
            Some(error) => Err(error.clone()),
            None => Ok(self.response.clone()),
        }
    }
}

/// Services wired with an in-memory session store and nothing else.
pub fn bare_services() -> Services {
    Services::new(Arc::new(crate::services::MemorySessionStore::new()))
}

/// A run identity for tests.
pub fn test_run_info() -> RunInfo {
    RunInfo {
        run_id: "run-test".into(),
        session_id: "sess-test".into(),
        bot_id: "bot-test".into(),
        user_id: "user-test".into(),
        request_id: "req-test".into(),
    }
}
