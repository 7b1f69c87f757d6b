//! Shared resilience primitives for flowgraph.
//!
//! The embedding and LLM paths both throttle outbound calls and shed load
//! when an upstream provider degrades. This crate holds the pieces they
//! share: a cooperative token bucket, a failure-counting circuit breaker,
//! and exponential-backoff retry configuration.

pub mod resilience;

pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitOpenError, CircuitState, RetryConfig,
    TokenBucket,
};
