//! Retry/backoff, circuit breaker and the panic/corruption error classifier
//! that sits in front of the vector store so a fragile embedded DB call
//! never takes the whole query pipeline down with it.

use std::fmt;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;
use thiserror::Error;

/// How a failed operation's error message was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Native runtime panic (e.g. an out-of-range index unwound through FFI).
    /// Never retried.
    Panic,
    /// Persisted data is unreadable; the index needs to be rebuilt. Never
    /// retried.
    Corruption,
    /// Anything else — assumed transient and worth retrying.
    Transient,
}

const PANIC_PATTERNS: &[&str] = &[
    "rust panic",
    "pyo3_runtime.panicexception",
    "thread 'tokio-runtime-worker' panicked",
    "rust/sqlite/src/db.rs",
];

const CORRUPTION_PATTERNS: &[&str] = &[
    "pickle",
    "unpickling",
    "eof",
    "ran out of input",
    "hnsw",
    "deserialize",
    "corrupt",
];

/// Classify a failure by the text of its error message, distinguishing a
/// native panic or store corruption from an ordinary transient failure —
/// both of those are propagated immediately, never retried.
#[must_use]
pub fn classify(message: &str) -> ErrorClass {
    let lower = message.to_lowercase();

    if (lower.contains("range start index") && lower.contains("out of range"))
        || PANIC_PATTERNS.iter().any(|p| lower.contains(p))
    {
        return ErrorClass::Panic;
    }

    if CORRUPTION_PATTERNS.iter().any(|p| lower.contains(p)) {
        return ErrorClass::Corruption;
    }

    ErrorClass::Transient
}

pub mod error {
    use super::{Duration, Error};

    /// Closed taxonomy of core error kinds, surfaced with user-facing
    /// remediation text where one applies.
    #[derive(Debug, Error)]
    pub enum CoreError {
        #[error("project not found: {0}")]
        ProjectNotFound(String),

        #[error("failed to parse {path}: {message}")]
        ParsingError { path: String, message: String },

        #[error("native runtime panic: {0} — reindexing is recommended")]
        RustPanicError(String),

        #[error("search error: {0} — reindex required")]
        SearchError(String),

        #[error("service unavailable: circuit breaker is open, try again later")]
        ServiceUnavailableError,

        #[error("transient io error: {0}")]
        TransientIoError(String),

        #[error("operation timed out after {0:?}")]
        TimeoutError(Duration),
    }
}

pub use error::CoreError;

/// `Closed → (N consecutive transient failures) → Open → (cooldown elapsed)
/// → HalfOpen → (success) → Closed | (failure) → Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Fail-fast guard protecting the store from repeated transient failure.
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
            failure_threshold,
            cooldown,
        }
    }

    /// Returns `true` if a call may proceed, transitioning `Open -> HalfOpen`
    /// when the cooldown has elapsed.
    fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.cooldown {
                    inner.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.consecutive_failures += 1;
        if inner.state == BreakerState::HalfOpen || inner.consecutive_failures >= self.failure_threshold {
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(30))
    }
}

/// Retry/backoff/circuit-breaker policy wrapping a fragile async operation.
pub struct ResilienceManager {
    breaker: CircuitBreaker,
    base_delay: Duration,
}

impl ResilienceManager {
    #[must_use]
    pub fn new(breaker: CircuitBreaker, base_delay: Duration) -> Self {
        Self { breaker, base_delay }
    }

    /// `execute(op, max_retries=3, jitter=0.2)`: runs `op`, classifying any
    /// failure. Panics and corruption propagate immediately, un-retried.
    /// Everything else is retried with `base * 2^attempt *
    /// U(1-jitter, 1+jitter)` backoff up to `max_retries` times. While the
    /// circuit breaker is open, fails fast with `ServiceUnavailableError`.
    pub async fn execute<T, E, F, Fut>(
        &self,
        mut op: F,
        max_retries: u32,
        jitter: f64,
    ) -> Result<T, CoreError>
    where
        E: fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.breaker.allow_request() {
            return Err(CoreError::ServiceUnavailableError);
        }

        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => {
                    self.breaker.record_success();
                    return Ok(value);
                }
                Err(err) => {
                    let message = err.to_string();
                    match classify(&message) {
                        // The breaker tracks consecutive *transient* failures only
                        // (spec.md S5): a panic or corruption hit is fatal for this
                        // call but says nothing about the store's general health,
                        // so it leaves breaker state untouched.
                        ErrorClass::Panic => {
                            return Err(CoreError::RustPanicError(message));
                        }
                        ErrorClass::Corruption => {
                            return Err(CoreError::SearchError(message));
                        }
                        ErrorClass::Transient => {
                            self.breaker.record_failure();
                            if attempt >= max_retries {
                                return Err(CoreError::TransientIoError(message));
                            }
                            let delay = backoff_delay(self.base_delay, attempt, jitter);
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                    }
                }
            }
        }
    }
}

impl Default for ResilienceManager {
    fn default() -> Self {
        Self::new(CircuitBreaker::default(), Duration::from_millis(200))
    }
}

fn backoff_delay(base: Duration, attempt: u32, jitter: f64) -> Duration {
    let multiplier = 2f64.powi(attempt as i32);
    let jitter = jitter.clamp(0.0, 1.0);
    let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
    base.mul_f64(multiplier * factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_panic_patterns() {
        assert_eq!(
            classify("thread 'tokio-runtime-worker' panicked at src/lib.rs"),
            ErrorClass::Panic
        );
        assert_eq!(
            classify("range start index 5 out of range for slice of length 3"),
            ErrorClass::Panic
        );
    }

    #[test]
    fn classifies_known_corruption_patterns() {
        assert_eq!(classify("failed to deserialize index.json"), ErrorClass::Corruption);
        assert_eq!(classify("hnsw graph corrupt"), ErrorClass::Corruption);
    }

    #[test]
    fn classifies_unknown_as_transient() {
        assert_eq!(classify("connection reset by peer"), ErrorClass::Transient);
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let manager = ResilienceManager::new(CircuitBreaker::new(10, Duration::from_secs(30)), Duration::from_millis(1));
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: Result<u32, CoreError> = manager
            .execute(
                || {
                    let n = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err::<u32, _>("connection reset".to_string())
                        } else {
                            Ok(42)
                        }
                    }
                },
                3,
                0.2,
            )
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn panic_is_not_retried() {
        let manager = ResilienceManager::default();
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: Result<u32, CoreError> = manager
            .execute(
                || {
                    attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    async move { Err::<u32, _>("thread 'tokio-runtime-worker' panicked".to_string()) }
                },
                3,
                0.2,
            )
            .await;
        assert!(matches!(result, Err(CoreError::RustPanicError(_))));
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panic_leaves_circuit_breaker_unchanged() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        let manager = ResilienceManager::new(breaker, Duration::from_millis(1));

        let _ = manager
            .execute(
                || async { Err::<u32, _>("thread 'tokio-runtime-worker' panicked".to_string()) },
                3,
                0.2,
            )
            .await;

        // A threshold-of-1 breaker would trip on a single transient failure;
        // since a panic is never counted, the next call still runs instead
        // of failing fast with `ServiceUnavailableError`.
        let result: Result<u32, CoreError> = manager.execute(|| async { Ok(7) }, 0, 0.0).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn open_breaker_fails_fast() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        let manager = ResilienceManager::new(breaker, Duration::from_millis(1));
        let _ = manager
            .execute(|| async { Err::<u32, _>("connection reset".to_string()) }, 0, 0.0)
            .await;
        let result: Result<u32, CoreError> = manager.execute(|| async { Ok(1) }, 0, 0.0).await;
        assert!(matches!(result, Err(CoreError::ServiceUnavailableError)));
    }
}
