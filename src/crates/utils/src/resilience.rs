//! Token bucket, circuit breaker, and retry backoff.
//!
//! All three primitives are process-global in practice: callers construct
//! them once at startup and share them behind `Arc`. Locking is kept
//! fine-grained; the bucket takes one mutex around refill+consume, the
//! breaker runs on atomics.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

/// Raised by [`CircuitBreaker::check`] while the circuit is open.
#[derive(Debug, Error)]
#[error("circuit breaker open, retry in {remaining_ms}ms")]
pub struct CircuitOpenError {
    /// Milliseconds until the breaker transitions to half-open
    pub remaining_ms: u64,
}

/// Cooperative token bucket refilled at `rate` tokens per second.
///
/// `acquire` suspends the calling task until enough tokens accumulate; it
/// never busy-waits longer than one second per sleep so a raised rate takes
/// effect quickly.
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    updated_at: Instant,
}

impl TokenBucket {
    /// Create a bucket refilling at `rate` tokens/sec, holding at most
    /// `capacity` tokens. A zero or negative rate is clamped to a minimal
    /// positive value so `acquire` always makes progress.
    pub fn new(rate: f64, capacity: f64) -> Self {
        let rate = if rate > 0.0 { rate } else { 0.001 };
        let capacity = capacity.max(rate);
        Self {
            rate,
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                updated_at: Instant::now(),
            }),
        }
    }

    /// Bucket sized so `burst` requests can pass immediately, then `rate`/sec.
    pub fn with_burst(rate: f64, burst: f64) -> Self {
        Self::new(rate, burst)
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.updated_at).as_secs_f64();
        if elapsed <= 0.0 {
            return;
        }
        state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);
        state.updated_at = now;
    }

    /// Acquire `tokens` tokens, waiting as long as necessary.
    pub async fn acquire(&self, tokens: f64) {
        if tokens <= 0.0 {
            return;
        }

        loop {
            let wait = {
                let mut state = self.state.lock();
                self.refill(&mut state);
                if state.tokens >= tokens {
                    state.tokens -= tokens;
                    return;
                }
                let deficit = tokens - state.tokens;
                deficit / self.rate
            };

            let wait = wait.clamp(0.01, 1.0);
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
        }
    }

    /// Non-blocking variant: take the tokens if available right now.
    pub fn try_acquire(&self, tokens: f64) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens >= tokens {
            state.tokens -= tokens;
            true
        } else {
            false
        }
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow normally
    Closed,
    /// Requests are rejected without reaching the upstream
    Open,
    /// Probing: the next request decides whether to close or re-open
    HalfOpen,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive transient failures before the circuit opens
    pub failure_threshold: u32,
    /// How long the circuit stays open before allowing a probe
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

/// Failure-counting gate shared by the embedding and LLM clients.
///
/// Only *consecutive* failures trip the breaker; any success resets the
/// counter. After `recovery_timeout` the first `check` moves the breaker to
/// half-open and lets one caller through to probe the upstream.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    failures: AtomicU32,
    state: AtomicU8,
    opened_at_ms: AtomicU64,
    epoch: Instant,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            failures: AtomicU32::new(0),
            state: AtomicU8::new(STATE_CLOSED),
            opened_at_ms: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Current state (open circuits past their recovery window report
    /// half-open).
    pub fn state(&self) -> CircuitState {
        match self.state.load(Ordering::Acquire) {
            STATE_OPEN => {
                let elapsed = self.now_ms().saturating_sub(self.opened_at_ms.load(Ordering::Acquire));
                if elapsed >= self.config.recovery_timeout.as_millis() as u64 {
                    CircuitState::HalfOpen
                } else {
                    CircuitState::Open
                }
            }
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    /// Gate a request. Returns `Ok(())` when the request may proceed.
    pub fn check(&self) -> Result<(), CircuitOpenError> {
        if self.state.load(Ordering::Acquire) != STATE_OPEN {
            return Ok(());
        }

        let opened = self.opened_at_ms.load(Ordering::Acquire);
        let elapsed = self.now_ms().saturating_sub(opened);
        let recovery_ms = self.config.recovery_timeout.as_millis() as u64;

        if elapsed >= recovery_ms {
            // Recovery window elapsed: move to half-open and let the probe through.
            if self
                .state
                .compare_exchange(STATE_OPEN, STATE_HALF_OPEN, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                info!(elapsed_ms = elapsed, "circuit breaker half-open, probing upstream");
            }
            return Ok(());
        }

        Err(CircuitOpenError {
            remaining_ms: recovery_ms - elapsed,
        })
    }

    /// Record a successful upstream call.
    pub fn record_success(&self) {
        self.failures.store(0, Ordering::Release);
        let prev = self.state.swap(STATE_CLOSED, Ordering::AcqRel);
        if prev != STATE_CLOSED {
            info!("circuit breaker closed");
        }
    }

    /// Record a transient upstream failure.
    pub fn record_failure(&self) {
        let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
        let state = self.state.load(Ordering::Acquire);

        let should_open = match state {
            STATE_HALF_OPEN => true,
            STATE_CLOSED => failures >= self.config.failure_threshold,
            _ => false,
        };

        if should_open {
            self.opened_at_ms.store(self.now_ms(), Ordering::Release);
            self.state.store(STATE_OPEN, Ordering::Release);
            warn!(
                failures,
                recovery_sec = self.config.recovery_timeout.as_secs(),
                "circuit breaker opened"
            );
        }
    }
}

/// Exponential-backoff retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting the first call)
    pub max_retries: u32,
    /// Initial backoff delay in milliseconds
    pub initial_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds
    pub max_backoff_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter to each delay
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Set initial backoff delay
    pub fn with_initial_backoff(mut self, ms: u64) -> Self {
        self.initial_backoff_ms = ms;
        self
    }

    /// Set maximum backoff delay
    pub fn with_max_backoff(mut self, ms: u64) -> Self {
        self.max_backoff_ms = ms;
        self
    }

    /// Set backoff multiplier
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Backoff delay for a zero-based attempt index.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay_ms = (self.initial_backoff_ms as f64
            * self.backoff_multiplier.powi(attempt as i32)) as u64;
        let delay_ms = delay_ms.min(self.max_backoff_ms);

        let delay_ms = if self.jitter {
            let jitter_amount = (delay_ms as f64 * 0.25 * rand::random::<f64>()) as u64;
            delay_ms + jitter_amount
        } else {
            delay_ms
        };

        Duration::from_millis(delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_bucket_allows_burst_then_throttles() {
        let bucket = TokenBucket::with_burst(100.0, 2.0);
        assert!(bucket.try_acquire(1.0));
        assert!(bucket.try_acquire(1.0));
        assert!(!bucket.try_acquire(1.0));
    }

    #[tokio::test]
    async fn token_bucket_refills_over_time() {
        let bucket = TokenBucket::new(1000.0, 1.0);
        assert!(bucket.try_acquire(1.0));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(bucket.try_acquire(1.0));
    }

    #[test]
    fn breaker_opens_after_threshold() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
        });

        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.check().is_ok());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.check().is_err());
    }

    #[test]
    fn breaker_success_resets_failure_count() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_secs(60),
        });

        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert!(breaker.check().is_ok());
    }

    #[tokio::test]
    async fn breaker_half_open_then_closes_on_success() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_millis(20),
        });

        breaker.record_failure();
        assert!(breaker.check().is_err());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(breaker.check().is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.check().is_ok());
    }

    #[tokio::test]
    async fn breaker_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_millis(10),
        });

        for _ in 0..3 {
            breaker.record_failure();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(breaker.check().is_ok());

        // Single probe failure re-opens regardless of threshold.
        breaker.record_failure();
        assert!(breaker.check().is_err());
    }

    #[test]
    fn backoff_delay_is_capped() {
        let config = RetryConfig::new(10)
            .with_initial_backoff(100)
            .with_max_backoff(1_000)
            .with_jitter(false);

        assert_eq!(config.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(config.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(config.backoff_delay(8), Duration::from_millis(1_000));
    }
}
