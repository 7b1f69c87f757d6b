//! Text-to-vector embedding with resilience.
//!
//! [`EmbeddingService`] wraps a provider behind a token bucket, a circuit
//! breaker, and classified retry with backoff. Long inputs are sub-batched
//! and embedded with bounded parallelism, preserving input order.

use crate::error::EmbeddingError;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use utils::{CircuitBreaker, CircuitBreakerConfig, RetryConfig, TokenBucket};

/// Low-level embedding backend.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts; one vector per input, same order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    fn dimensions(&self) -> usize;
}

/// Embedding service configuration, driven by the `embedding.*` settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
    /// Minimum interval between provider requests, as a rate limit
    #[serde(default = "default_request_interval_ms")]
    pub request_interval_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_multiplier")]
    pub retry_multiplier: f64,
    #[serde(default = "default_retry_min_wait_ms")]
    pub retry_min_wait_ms: u64,
    #[serde(default = "default_retry_max_wait_ms")]
    pub retry_max_wait_ms: u64,
    #[serde(default = "default_failure_threshold")]
    pub circuit_failure_threshold: u32,
    #[serde(default = "default_recovery_timeout_sec")]
    pub circuit_recovery_timeout_sec: u64,
}

fn default_batch_size() -> usize {
    16
}
fn default_max_concurrent() -> usize {
    2
}
fn default_request_interval_ms() -> u64 {
    100
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_multiplier() -> f64 {
    2.0
}
fn default_retry_min_wait_ms() -> u64 {
    200
}
fn default_retry_max_wait_ms() -> u64 {
    5_000
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_recovery_timeout_sec() -> u64 {
    30
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_concurrent_requests: default_max_concurrent(),
            request_interval_ms: default_request_interval_ms(),
            max_retries: default_max_retries(),
            retry_multiplier: default_retry_multiplier(),
            retry_min_wait_ms: default_retry_min_wait_ms(),
            retry_max_wait_ms: default_retry_max_wait_ms(),
            circuit_failure_threshold: default_failure_threshold(),
            circuit_recovery_timeout_sec: default_recovery_timeout_sec(),
        }
    }
}

/// Resilient embedding client shared process-wide.
pub struct EmbeddingService {
    provider: Arc<dyn EmbeddingProvider>,
    config: EmbeddingConfig,
    bucket: TokenBucket,
    breaker: CircuitBreaker,
    retry: RetryConfig,
}

impl EmbeddingService {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: EmbeddingConfig) -> Self {
        let per_second = 1000.0 / config.request_interval_ms.max(1) as f64;
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: config.circuit_failure_threshold,
            recovery_timeout: Duration::from_secs(config.circuit_recovery_timeout_sec),
        });
        let retry = RetryConfig::new(config.max_retries)
            .with_initial_backoff(config.retry_min_wait_ms)
            .with_max_backoff(config.retry_max_wait_ms)
            .with_multiplier(config.retry_multiplier);

        Self {
            provider,
            bucket: TokenBucket::with_burst(per_second, per_second.max(1.0)),
            breaker,
            retry,
            config,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    /// One provider call under the full resilience stack.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.breaker.check()?;
        self.bucket.acquire(1.0).await;

        let mut attempt = 0;
        loop {
            match self.provider.embed(texts).await {
                Ok(vectors) => {
                    self.breaker.record_success();
                    return Ok(vectors);
                }
                Err(e) => {
                    if e.is_retryable() {
                        self.breaker.record_failure();
                    }
                    if e.is_retryable() && attempt < self.retry.max_retries {
                        let backoff = self.retry.backoff_delay(attempt);
                        warn!(attempt, error = %e, "embedding call failed, backing off");
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                        // The breaker may have opened while we slept.
                        self.breaker.check()?;
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Embed documents, sub-batching by `batch_size` and running up to
    /// `max_concurrent_requests` batches at once. Output order matches
    /// input order.
    pub async fn embed_documents(
        &self,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let batches: Vec<&[String]> = texts.chunks(self.config.batch_size.max(1)).collect();
        debug!(inputs = texts.len(), batches = batches.len(), "embedding documents");

        let results: Vec<Result<Vec<Vec<f32>>, EmbeddingError>> = stream::iter(batches)
            .map(|batch| self.embed_batch(batch))
            .buffered(self.config.max_concurrent_requests.max(1))
            .collect()
            .await;

        let mut all = Vec::with_capacity(texts.len());
        for result in results {
            all.extend(result?);
        }
        Ok(all)
    }

    /// Embed a single query string.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("provider returned no vector".into()))
    }
}

/// Deterministic mock: SHA-256-derived pseudo-vectors, L2-normalized.
/// Identical text always embeds identically, which the tests and offline
/// development rely on.
pub struct MockEmbeddingProvider {
    dimensions: usize,
}

impl MockEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        let hex = format!("{digest:x}");
        let bytes = hex.as_bytes();

        let mut embedding = Vec::with_capacity(self.dimensions);
        let mut i = 0;
        while embedding.len() < self.dimensions {
            let offset = i % (hex.len() - 1);
            let pair = &bytes[offset..offset + 2];
            let value = u8::from_str_radix(std::str::from_utf8(pair).unwrap_or("00"), 16)
                .unwrap_or(0) as f32
                / 255.0;
            embedding.push(value);
            i += 2;
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }
        embedding
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// OpenAI-compatible `/embeddings` HTTP provider.
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl HttpEmbeddingProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| EmbeddingError::Api(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            dimensions,
        })
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDatum>,
}

#[derive(Deserialize)]
struct EmbedDatum {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
                dimensions: self.dimensions,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EmbeddingError::Api(format!("embedding request timed out: {e}"))
                } else {
                    EmbeddingError::Api(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(match status {
                401 | 403 => EmbeddingError::Auth(body),
                429 => EmbeddingError::RateLimited(body),
                _ => EmbeddingError::Api(format!("status {status}: {body}")),
            });
        }

        let mut parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;
        if parsed.data.len() != texts.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} vectors, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
