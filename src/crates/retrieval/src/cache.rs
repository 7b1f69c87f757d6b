//! Similarity-keyed LLM response cache.
//!
//! Keyed by provider/model/system-prompt-hash/temperature/max-tokens plus
//! cosine similarity of prompt embeddings. Bounded LRU with TTL; prompts
//! below `min_chars` never participate. A hit returns the cached string
//! without an LLM call.

use crate::embeddings::EmbeddingService;
use crate::cosine_similarity;
use async_trait::async_trait;
use flowgraph_core::services::{CacheMeta, ResponseCache};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Cache tuning, driven by the `semantic_cache.*` settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticCacheConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Cosine similarity threshold for a hit
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_ttl_sec")]
    pub ttl_sec: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Prompts shorter than this never hit or store
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
}

fn default_enabled() -> bool {
    true
}
fn default_threshold() -> f64 {
    0.95
}
fn default_ttl_sec() -> u64 {
    3600
}
fn default_max_entries() -> usize {
    500
}
fn default_min_chars() -> usize {
    32
}

impl Default for SemanticCacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            threshold: default_threshold(),
            ttl_sec: default_ttl_sec(),
            max_entries: default_max_entries(),
            min_chars: default_min_chars(),
        }
    }
}

struct CacheEntry {
    embedding: Vec<f32>,
    response: String,
    meta: CacheMeta,
    created_at: Instant,
}

/// Process-global semantic cache.
pub struct SemanticCache {
    config: SemanticCacheConfig,
    embeddings: Arc<EmbeddingService>,
    entries: Mutex<LruCache<String, CacheEntry>>,
}

impl SemanticCache {
    pub fn new(embeddings: Arc<EmbeddingService>, config: SemanticCacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            embeddings,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn usable_prompt<'a>(&self, prompt: &'a str) -> Option<&'a str> {
        if !self.config.enabled {
            return None;
        }
        let normalized = prompt.trim();
        (normalized.chars().count() >= self.config.min_chars).then_some(normalized)
    }

    fn entry_key(prompt: &str, meta: &CacheMeta) -> String {
        let mut hasher = Sha256::new();
        hasher.update(prompt.as_bytes());
        hasher.update(meta.provider.as_bytes());
        hasher.update(meta.model.as_bytes());
        hasher.update(meta.system_prompt_hash.as_bytes());
        hasher.update(meta.temperature_bucket.to_le_bytes());
        hasher.update(meta.max_tokens_bucket.to_le_bytes());
        if let Some(context_hash) = &meta.context_hash {
            hasher.update(context_hash.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    /// Meta match: exact on the key fields; `context_hash` compared only
    /// when either side carries one.
    fn meta_matches(cached: &CacheMeta, request: &CacheMeta) -> bool {
        if cached.provider != request.provider
            || cached.model != request.model
            || cached.system_prompt_hash != request.system_prompt_hash
            || cached.temperature_bucket != request.temperature_bucket
            || cached.max_tokens_bucket != request.max_tokens_bucket
        {
            return false;
        }
        if cached.context_hash.is_some() || request.context_hash.is_some() {
            return cached.context_hash == request.context_hash;
        }
        true
    }

    fn ttl(&self) -> Option<Duration> {
        (self.config.ttl_sec > 0).then(|| Duration::from_secs(self.config.ttl_sec))
    }
}

#[async_trait]
impl ResponseCache for SemanticCache {
    async fn lookup(&self, prompt: &str, meta: &CacheMeta) -> Option<String> {
        let prompt = self.usable_prompt(prompt)?;

        let embedding = match self.embeddings.embed_query(prompt).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!(error = %e, "semantic cache lookup embedding failed");
                return None;
            }
        };

        let ttl = self.ttl();
        let mut entries = self.entries.lock();

        let mut best: Option<(String, f64)> = None;
        for (key, entry) in entries.iter() {
            if let Some(ttl) = ttl {
                if entry.created_at.elapsed() > ttl {
                    continue;
                }
            }
            if !Self::meta_matches(&entry.meta, meta) {
                continue;
            }
            let score = cosine_similarity(&embedding, &entry.embedding);
            if score >= self.config.threshold
                && best.as_ref().map(|(_, s)| score > *s).unwrap_or(true)
            {
                best = Some((key.clone(), score));
            }
        }

        let (key, score) = best?;
        // Promote the hit and return its response.
        let response = entries.get(&key).map(|entry| entry.response.clone())?;
        info!(score, provider = %meta.provider, model = %meta.model, "semantic cache hit");
        Some(response)
    }

    async fn store(&self, prompt: &str, response: &str, meta: &CacheMeta) {
        let Some(prompt) = self.usable_prompt(prompt) else { return };
        if response.trim().is_empty() {
            return;
        }

        let embedding = match self.embeddings.embed_query(prompt).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!(error = %e, "semantic cache store embedding failed");
                return;
            }
        };

        let key = Self::entry_key(prompt, meta);
        let preview: String = prompt.chars().take(120).collect();
        let mut entries = self.entries.lock();
        entries.put(
            key,
            CacheEntry {
                embedding,
                response: response.to_string(),
                meta: meta.clone(),
                created_at: Instant::now(),
            },
        );
        debug!(size = entries.len(), prompt = %preview, "semantic cache stored entry");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{EmbeddingConfig, MockEmbeddingProvider};

    fn cache(config: SemanticCacheConfig) -> SemanticCache {
        let embeddings = Arc::new(EmbeddingService::new(
            Arc::new(MockEmbeddingProvider::new(64)),
            EmbeddingConfig { request_interval_ms: 1, ..Default::default() },
        ));
        SemanticCache::new(embeddings, config)
    }

    fn meta() -> CacheMeta {
        CacheMeta {
            provider: "openai".into(),
            model: "gpt-4o-mini".into(),
            system_prompt_hash: "h".into(),
            temperature_bucket: 20,
            max_tokens_bucket: 400,
            context_hash: None,
        }
    }

    const PROMPT: &str = "what is python and why is it considered high level";

    #[tokio::test]
    async fn identical_prompt_hits() {
        let cache = cache(SemanticCacheConfig::default());
        assert!(cache.lookup(PROMPT, &meta()).await.is_none());

        cache.store(PROMPT, "Python is a language.", &meta()).await;
        assert_eq!(
            cache.lookup(PROMPT, &meta()).await.as_deref(),
            Some("Python is a language.")
        );
    }

    #[tokio::test]
    async fn different_model_misses() {
        let cache = cache(SemanticCacheConfig::default());
        cache.store(PROMPT, "answer", &meta()).await;

        let mut other = meta();
        other.model = "gpt-4o".into();
        assert!(cache.lookup(PROMPT, &other).await.is_none());
    }

    #[tokio::test]
    async fn context_hash_compared_when_present() {
        let cache = cache(SemanticCacheConfig::default());
        let mut with_context = meta();
        with_context.context_hash = Some("ctx1".into());
        cache.store(PROMPT, "contextual answer", &with_context).await;

        // No-context request must not see the contextual entry.
        assert!(cache.lookup(PROMPT, &meta()).await.is_none());
        // Same context hash hits.
        assert_eq!(
            cache.lookup(PROMPT, &with_context).await.as_deref(),
            Some("contextual answer")
        );
    }

    #[tokio::test]
    async fn short_prompts_never_participate() {
        let cache = cache(SemanticCacheConfig::default());
        cache.store("short", "x", &meta()).await;
        assert!(cache.lookup("short", &meta()).await.is_none());
    }

    #[tokio::test]
    async fn ttl_expires_entries() {
        let cache = cache(SemanticCacheConfig { ttl_sec: 1, ..Default::default() });
        cache.store(PROMPT, "stale soon", &meta()).await;
        assert!(cache.lookup(PROMPT, &meta()).await.is_some());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(cache.lookup(PROMPT, &meta()).await.is_none());
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_used() {
        let cache = cache(SemanticCacheConfig { max_entries: 2, ..Default::default() });
        let prompts = [
            "first prompt long enough to participate in the cache",
            "second prompt long enough to participate in the cache",
            "third prompt long enough to participate in the cache",
        ];
        for (i, prompt) in prompts.iter().enumerate() {
            cache.store(prompt, &format!("answer {i}"), &meta()).await;
        }
        // Oldest entry fell out.
        assert!(cache.lookup(prompts[0], &meta()).await.is_none());
        assert!(cache.lookup(prompts[2], &meta()).await.is_some());
    }

    #[tokio::test]
    async fn disabled_cache_never_hits() {
        let cache = cache(SemanticCacheConfig { enabled: false, ..Default::default() });
        cache.store(PROMPT, "x", &meta()).await;
        assert!(cache.lookup(PROMPT, &meta()).await.is_none());
    }
}
