//! Resilient execution of brokerage calls.
//!
//! The executor is the only path to the brokerage. Every attempt:
//! - takes a token from the limiter of its endpoint class
//! - runs under a per-call timeout
//! - is classified on failure and either retried with exponential backoff,
//!   abandoned (permanent errors), or surfaced once retries run out
//!
//! A duplicate client order id is reported as [`ExecutorError::AlreadySubmitted`]
//! so callers can account for an order whose acknowledgement was lost.
//!
//! # Example
//!
//! ```ignore
//! let price = executor
//!     .execute(EndpointClass::MarketData, "latest_price", || broker.latest_price("AAPL"))
//!     .await?;
//! ```

use crate::rate_limiter::{EndpointClass, RateLimiters};
use qtrade_core::{BrokerError, BrokerResult, ErrorClass, RetryConfig, Shutdown};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

// =============================================================================
// Errors
// =============================================================================

/// Failures the executor surfaces to its caller.
///
/// Permanent brokerage errors are not in here: they come back as `Ok(None)`.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Every attempt failed; carries the last brokerage error.
    #[error("{operation} failed after {attempts} attempts: {source}")]
    Exhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: BrokerError,
    },

    /// The limiter never granted a token.
    #[error("{operation} never got a {class} rate limit token in {attempts} attempts")]
    RateLimited {
        operation: String,
        class: EndpointClass,
        attempts: u32,
    },

    /// Shutdown was requested between attempts.
    #[error("{operation} cancelled by shutdown")]
    Cancelled { operation: String },

    /// The brokerage already holds this client order id; an earlier
    /// attempt reached it.
    #[error("{operation} already submitted (attempt {attempt}): {source}")]
    AlreadySubmitted {
        operation: String,
        attempt: u32,
        #[source]
        source: BrokerError,
    },
}

impl ExecutorError {
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    #[must_use]
    pub const fn is_already_submitted(&self) -> bool {
        matches!(self, Self::AlreadySubmitted { .. })
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Counters since startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorStats {
    pub attempts: u64,
    pub backoff_sleeps: u64,
    pub rate_limited_errors: u64,
    pub permanent_failures: u64,
    pub duplicate_orders: u64,
    pub exhausted: u64,
}

#[derive(Debug, Default)]
struct Counters {
    attempts: AtomicU64,
    backoff_sleeps: AtomicU64,
    rate_limited_errors: AtomicU64,
    permanent_failures: AtomicU64,
    duplicate_orders: AtomicU64,
    exhausted: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ExecutorStats {
        ExecutorStats {
            attempts: self.attempts.load(Ordering::Relaxed),
            backoff_sleeps: self.backoff_sleeps.load(Ordering::Relaxed),
            rate_limited_errors: self.rate_limited_errors.load(Ordering::Relaxed),
            permanent_failures: self.permanent_failures.load(Ordering::Relaxed),
            duplicate_orders: self.duplicate_orders.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

// =============================================================================
// RequestExecutor
// =============================================================================

/// Wraps brokerage calls with rate limiting, timeouts and retries.
#[derive(Debug)]
pub struct RequestExecutor {
    limiters: Arc<RateLimiters>,
    retry: RetryConfig,
    shutdown: Shutdown,
    counters: Counters,
}

impl RequestExecutor {
    #[must_use]
    pub fn new(limiters: Arc<RateLimiters>, retry: RetryConfig, shutdown: Shutdown) -> Self {
        Self {
            limiters,
            retry,
            shutdown,
            counters: Counters::default(),
        }
    }

    #[must_use]
    pub fn limiters(&self) -> &Arc<RateLimiters> {
        &self.limiters
    }

    #[must_use]
    pub const fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    #[must_use]
    pub fn stats(&self) -> ExecutorStats {
        self.counters.snapshot()
    }

    /// Runs `call` until it succeeds, fails permanently, or runs out of attempts.
    ///
    /// Returns `Ok(Some(value))` on success and `Ok(None)` when the brokerage
    /// rejects the call in a way retrying cannot fix. `call` is invoked once
    /// per attempt; a call that is not naturally idempotent (order submission)
    /// must carry its own idempotency key.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::Exhausted`] with the last error once
    /// `max_retries` attempts have failed, [`ExecutorError::RateLimited`] if no
    /// attempt ever got a token, [`ExecutorError::Cancelled`] if shutdown
    /// is requested between attempts, and [`ExecutorError::AlreadySubmitted`]
    /// when the brokerage reports the idempotency key as already used.
    pub async fn execute<T, F, Fut>(
        &self,
        class: EndpointClass,
        operation: &str,
        mut call: F,
    ) -> Result<Option<T>, ExecutorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BrokerResult<T>>,
    {
        let limiter = self.limiters.get(class);
        let max_attempts = self.retry.max_retries.max(1);
        let mut last_error: Option<BrokerError> = None;

        for attempt in 0..max_attempts {
            if self.shutdown.is_triggered() {
                return Err(ExecutorError::Cancelled {
                    operation: operation.to_string(),
                });
            }
            let remaining = max_attempts - attempt - 1;

            if !limiter.acquire(1.0, true).await {
                tracing::warn!(operation, %class, attempt, remaining, "rate limiter refused token");
                if remaining > 0 {
                    self.back_off(operation, attempt).await?;
                }
                continue;
            }

            bump(&self.counters.attempts);
            let outcome = match tokio::time::timeout(self.retry.call_timeout(), call()).await {
                Ok(result) => result,
                Err(_) => Err(BrokerError::Timeout(format!(
                    "{operation} exceeded {}ms",
                    self.retry.call_timeout_ms
                ))),
            };

            let err = match outcome {
                Ok(value) => return Ok(Some(value)),
                Err(err) => err,
            };

            match err.class() {
                ErrorClass::Permanent => {
                    bump(&self.counters.permanent_failures);
                    tracing::error!(operation, error = %err, "non-retryable brokerage error");
                    return Ok(None);
                }
                ErrorClass::Duplicate => {
                    bump(&self.counters.duplicate_orders);
                    tracing::warn!(operation, attempt, error = %err, "brokerage already holds this order");
                    return Err(ExecutorError::AlreadySubmitted {
                        operation: operation.to_string(),
                        attempt,
                        source: err,
                    });
                }
                ErrorClass::RateLimited => {
                    bump(&self.counters.rate_limited_errors);
                    limiter.record_error();
                    tracing::warn!(operation, %class, attempt, remaining, "rate limited by brokerage");
                }
                ErrorClass::Transient => {
                    tracing::warn!(operation, attempt, remaining, error = %err, "brokerage call failed");
                }
            }

            last_error = Some(err);
            if remaining > 0 {
                self.back_off(operation, attempt).await?;
            }
        }

        match last_error {
            Some(source) => {
                bump(&self.counters.exhausted);
                tracing::error!(operation, attempts = max_attempts, error = %source, "retries exhausted");
                Err(ExecutorError::Exhausted {
                    operation: operation.to_string(),
                    attempts: max_attempts,
                    source,
                })
            }
            None => {
                bump(&self.counters.exhausted);
                tracing::error!(operation, %class, attempts = max_attempts, "no rate limit token granted");
                Err(ExecutorError::RateLimited {
                    operation: operation.to_string(),
                    class,
                    attempts: max_attempts,
                })
            }
        }
    }

    /// Sleeps `min(base * 2^attempt, max)`, cut short by shutdown.
    async fn back_off(&self, operation: &str, attempt: u32) -> Result<(), ExecutorError> {
        let delay = self.retry.backoff(attempt);
        bump(&self.counters.backoff_sleeps);
        tracing::debug!(operation, attempt, delay_ms = delay.as_millis() as u64, "backing off");

        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            () = tokio::time::sleep(delay) => Ok(()),
            () = shutdown.wait() => Err(ExecutorError::Cancelled {
                operation: operation.to_string(),
            }),
        }
    }
}
