//! Process configuration, read from the environment.
//!
//! Every knob the core consumes is enumerated here with its default; the
//! HTTP layer and deployment tooling own nothing engine-related.

use llm::LlmSettings;
use retrieval::{EmbeddingConfig, SemanticCacheConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Chunking parameters (`chunking.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self { chunk_size: 512, chunk_overlap: 128 }
    }
}

/// Retrieval parameters (`retrieval.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalSettings {
    pub default_top_k: usize,
    pub max_top_k: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self { default_top_k: 5, max_top_k: 50 }
    }
}

/// Run/scheduler parameters (`run.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSettings {
    pub default_timeout_sec: u64,
    pub node_default_timeout_sec: u64,
    /// Byte cap for recorded node inputs/outputs
    pub io_truncate_bytes: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            default_timeout_sec: 300,
            node_default_timeout_sec: 60,
            io_truncate_bytes: 16_384,
        }
    }
}

impl RunSettings {
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_sec)
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_secs(self.node_default_timeout_sec)
    }
}

/// Rate-limit parameters (`rate_limit.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Queries per second toward Bedrock-class providers; 0 disables
    pub bedrock_qps: f64,
    pub bedrock_burst: f64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self { bedrock_qps: 2.0, bedrock_burst: 4.0 }
    }
}

/// Embedding provider and model selection (`embedding.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    /// `mock` or `http`
    pub provider: String,
    pub model: String,
    pub dimensions: usize,
    pub api_key: String,
    pub base_url: String,
    #[serde(flatten)]
    pub service: EmbeddingConfig,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: "mock".into(),
            model: "text-embedding-3-small".into(),
            dimensions: 1024,
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".into(),
            service: EmbeddingConfig::default(),
        }
    }
}

/// Everything the core needs, in one place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub database_url: String,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub embedding: EmbeddingSettings,
    #[serde(default)]
    pub semantic_cache: SemanticCacheConfig,
    #[serde(default)]
    pub chunking: ChunkingSettings,
    #[serde(default)]
    pub retrieval: RetrievalSettings,
    #[serde(default)]
    pub run: RunSettings,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
}

impl Settings {
    /// Load settings from environment variables, with defaults for
    /// everything but credentials.
    pub fn from_env() -> Self {
        let settings = Self {
            database_url: env_string("DATABASE_URL", ""),
            llm: LlmSettings::from_env(),
            embedding: EmbeddingSettings {
                provider: env_string("EMBEDDING_PROVIDER", "mock"),
                model: env_string("EMBEDDING_MODEL", "text-embedding-3-small"),
                dimensions: env_parse("EMBEDDING_DIMENSIONS", 1024),
                api_key: env_string("EMBEDDING_API_KEY", ""),
                base_url: env_string("EMBEDDING_BASE_URL", "https://api.openai.com/v1"),
                service: EmbeddingConfig {
                    batch_size: env_parse("EMBEDDING_BATCH_SIZE", 16),
                    max_concurrent_requests: env_parse("EMBEDDING_MAX_CONCURRENT_REQUESTS", 2),
                    request_interval_ms: env_parse("EMBEDDING_REQUEST_INTERVAL_MS", 100),
                    max_retries: env_parse("EMBEDDING_MAX_RETRIES", 3),
                    retry_multiplier: env_parse("EMBEDDING_RETRY_MULTIPLIER", 2.0),
                    retry_min_wait_ms: env_parse("EMBEDDING_RETRY_MIN_WAIT_MS", 200),
                    retry_max_wait_ms: env_parse("EMBEDDING_RETRY_MAX_WAIT_MS", 5_000),
                    circuit_failure_threshold: env_parse("EMBEDDING_CIRCUIT_FAILURE_THRESHOLD", 5),
                    circuit_recovery_timeout_sec: env_parse(
                        "EMBEDDING_CIRCUIT_RECOVERY_TIMEOUT_SEC",
                        30,
                    ),
                },
            },
            semantic_cache: SemanticCacheConfig {
                enabled: env_parse("SEMANTIC_CACHE_ENABLED", true),
                threshold: env_parse("SEMANTIC_CACHE_THRESHOLD", 0.95),
                ttl_sec: env_parse("SEMANTIC_CACHE_TTL_SEC", 3600),
                max_entries: env_parse("SEMANTIC_CACHE_MAX_ENTRIES", 500),
                min_chars: env_parse("SEMANTIC_CACHE_MIN_CHARS", 32),
            },
            chunking: ChunkingSettings {
                chunk_size: env_parse("CHUNK_SIZE", 512),
                chunk_overlap: env_parse("CHUNK_OVERLAP", 128),
            },
            retrieval: RetrievalSettings {
                default_top_k: env_parse("RETRIEVAL_DEFAULT_TOP_K", 5),
                max_top_k: env_parse("RETRIEVAL_MAX_TOP_K", 50),
            },
            run: RunSettings {
                default_timeout_sec: env_parse("RUN_DEFAULT_TIMEOUT_SEC", 300),
                node_default_timeout_sec: env_parse("RUN_NODE_DEFAULT_TIMEOUT_SEC", 60),
                io_truncate_bytes: env_parse("RUN_IO_TRUNCATE_BYTES", 16_384),
            },
            rate_limit: RateLimitSettings {
                bedrock_qps: env_parse("RATE_LIMIT_BEDROCK_QPS", 2.0),
                bedrock_burst: env_parse("RATE_LIMIT_BEDROCK_BURST", 4.0),
            },
        };
        info!(
            embedding_provider = %settings.embedding.provider,
            default_llm = %settings.llm.default_provider,
            "settings loaded"
        );
        settings
    }
}
