//! Token-bucket rate limiting per endpoint class.
//!
//! Each endpoint class (market data, account, orders, positions) owns an
//! independent bucket with its own lock. A bucket refills continuously and
//! shrinks to half capacity while the brokerage keeps throttling us.
//!
//! # Example
//!
//! ```ignore
//! use qtrade_alpaca::{EndpointClass, RateLimiters};
//! use qtrade_core::RateLimitsConfig;
//!
//! let limiters = RateLimiters::from_config(&RateLimitsConfig::default());
//! if limiters.get(EndpointClass::Orders).acquire(1.0, false).await {
//!     // submit the order
//! }
//! ```

use parking_lot::Mutex;
use qtrade_core::{BucketConfig, RateLimitsConfig};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

// =============================================================================
// Constants
// =============================================================================

/// Trailing window used to count recent errors and calls.
pub const ERROR_WINDOW: Duration = Duration::from_secs(60);

/// More errors than this inside [`ERROR_WINDOW`] degrades the bucket.
pub const DEGRADE_ERROR_THRESHOLD: usize = 5;

/// Fraction of `max_tokens` available while degraded.
pub const DEGRADED_CAPACITY: f64 = 0.5;

/// Upper bound on sleep-and-retry rounds inside a waiting `acquire`.
pub const MAX_WAIT_ROUNDS: u32 = 16;

const CALL_HISTORY_CAP: usize = 1000;
const ERROR_HISTORY_CAP: usize = 100;

// =============================================================================
// Endpoint Classes
// =============================================================================

/// Brokerage operation class; each has its own quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointClass {
    MarketData,
    Account,
    Orders,
    Positions,
}

impl EndpointClass {
    pub const ALL: [Self; 4] = [Self::MarketData, Self::Account, Self::Orders, Self::Positions];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MarketData => "market_data",
            Self::Account => "account",
            Self::Orders => "orders",
            Self::Positions => "positions",
        }
    }
}

impl fmt::Display for EndpointClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Bucket State
// =============================================================================

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    calls: VecDeque<Instant>,
    errors: VecDeque<Instant>,
}

impl BucketState {
    fn new(config: &BucketConfig, now: Instant) -> Self {
        Self {
            tokens: config.max_tokens,
            last_refill: now,
            calls: VecDeque::new(),
            errors: VecDeque::new(),
        }
    }

    fn refill(&mut self, config: &BucketConfig, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if config.refill_period_secs > 0.0 {
            let added = elapsed / config.refill_period_secs * config.refill_rate.max(0.0);
            self.tokens = (self.tokens + added).min(config.max_tokens);
        }
        self.last_refill = now;

        if self.is_degraded(now) {
            self.tokens = self.tokens.min(config.max_tokens * DEGRADED_CAPACITY);
        }
    }

    fn is_degraded(&self, now: Instant) -> bool {
        count_within(&self.errors, now) > DEGRADE_ERROR_THRESHOLD
    }

    fn record_call(&mut self, now: Instant) {
        push_capped(&mut self.calls, now, CALL_HISTORY_CAP);
    }

    fn record_error(&mut self, now: Instant) {
        push_capped(&mut self.errors, now, ERROR_HISTORY_CAP);
    }
}

fn push_capped(history: &mut VecDeque<Instant>, at: Instant, cap: usize) {
    if history.len() == cap {
        history.pop_front();
    }
    history.push_back(at);
}

fn count_within(history: &VecDeque<Instant>, now: Instant) -> usize {
    history
        .iter()
        .filter(|at| now.saturating_duration_since(**at) <= ERROR_WINDOW)
        .count()
}

// =============================================================================
// RateLimiter
// =============================================================================

/// Point-in-time view of one limiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterStats {
    pub class: EndpointClass,
    pub available_tokens: f64,
    pub max_tokens: f64,
    pub calls_last_minute: usize,
    pub errors_last_minute: usize,
    pub degraded: bool,
}

/// Token bucket guarding one endpoint class.
///
/// All state lives behind a synchronous mutex that is released before any
/// sleep, so a waiting caller never blocks the others.
pub struct RateLimiter {
    class: EndpointClass,
    config: BucketConfig,
    state: Mutex<BucketState>,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("class", &self.class)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Creates a full bucket.
    #[must_use]
    pub fn new(class: EndpointClass, config: BucketConfig) -> Self {
        Self {
            class,
            config,
            state: Mutex::new(BucketState::new(&config, Instant::now())),
        }
    }

    #[must_use]
    pub const fn class(&self) -> EndpointClass {
        self.class
    }

    #[must_use]
    pub const fn config(&self) -> &BucketConfig {
        &self.config
    }

    /// Takes `tokens` from the bucket.
    ///
    /// With `wait == false` this is a non-blocking check. With `wait == true`
    /// the caller sleeps until enough tokens should have accumulated and tries
    /// again, for at most [`MAX_WAIT_ROUNDS`] rounds. Requests larger than the
    /// bucket are refused immediately.
    pub async fn acquire(&self, tokens: f64, wait: bool) -> bool {
        if !tokens.is_finite() || tokens > self.config.max_tokens {
            tracing::warn!(
                class = %self.class,
                requested = tokens,
                max_tokens = self.config.max_tokens,
                "token request can never be satisfied"
            );
            return false;
        }

        for round in 0..=MAX_WAIT_ROUNDS {
            let wait_for = {
                let mut state = self.state.lock();
                let now = Instant::now();
                state.refill(&self.config, now);

                if state.tokens >= tokens {
                    state.tokens -= tokens;
                    state.record_call(now);
                    return true;
                }

                if !wait || round == MAX_WAIT_ROUNDS {
                    return false;
                }

                match self.refill_time(tokens - state.tokens) {
                    Some(duration) => duration,
                    None => return false,
                }
            };

            tracing::debug!(
                class = %self.class,
                round,
                wait_ms = wait_for.as_millis() as u64,
                "rate limit reached, waiting for tokens"
            );
            tokio::time::sleep(wait_for).await;
        }

        false
    }

    /// Records a throttling error reported by the brokerage.
    pub fn record_error(&self) {
        let mut state = self.state.lock();
        let now = Instant::now();
        state.record_error(now);

        if state.is_degraded(now) {
            tracing::warn!(
                class = %self.class,
                recent_errors = count_within(&state.errors, now),
                "sustained rate limit errors, capacity reduced"
            );
        }
    }

    /// Tokens available right now, after refilling.
    #[must_use]
    pub fn available_tokens(&self) -> f64 {
        let mut state = self.state.lock();
        state.refill(&self.config, Instant::now());
        state.tokens
    }

    #[must_use]
    pub fn stats(&self) -> LimiterStats {
        let mut state = self.state.lock();
        let now = Instant::now();
        state.refill(&self.config, now);

        LimiterStats {
            class: self.class,
            available_tokens: state.tokens,
            max_tokens: self.config.max_tokens,
            calls_last_minute: count_within(&state.calls, now),
            errors_last_minute: count_within(&state.errors, now),
            degraded: state.is_degraded(now),
        }
    }

    /// Time until `needed` tokens accumulate; `None` if the bucket never refills.
    fn refill_time(&self, needed: f64) -> Option<Duration> {
        if self.config.refill_rate <= 0.0 || self.config.refill_period_secs <= 0.0 {
            return None;
        }
        let secs = needed / self.config.refill_rate * self.config.refill_period_secs;
        Duration::try_from_secs_f64(secs).ok()
    }
}

// =============================================================================
// RateLimiters
// =============================================================================

/// The four per-class limiters, built once at startup and shared.
#[derive(Debug, Clone)]
pub struct RateLimiters {
    market_data: Arc<RateLimiter>,
    account: Arc<RateLimiter>,
    orders: Arc<RateLimiter>,
    positions: Arc<RateLimiter>,
}

impl RateLimiters {
    #[must_use]
    pub fn from_config(config: &RateLimitsConfig) -> Self {
        Self {
            market_data: Arc::new(RateLimiter::new(EndpointClass::MarketData, config.market_data)),
            account: Arc::new(RateLimiter::new(EndpointClass::Account, config.account)),
            orders: Arc::new(RateLimiter::new(EndpointClass::Orders, config.orders)),
            positions: Arc::new(RateLimiter::new(EndpointClass::Positions, config.positions)),
        }
    }

    #[must_use]
    pub fn get(&self, class: EndpointClass) -> &Arc<RateLimiter> {
        match class {
            EndpointClass::MarketData => &self.market_data,
            EndpointClass::Account => &self.account,
            EndpointClass::Orders => &self.orders,
            EndpointClass::Positions => &self.positions,
        }
    }

    #[must_use]
    pub fn stats(&self) -> Vec<LimiterStats> {
        EndpointClass::ALL
            .iter()
            .map(|class| self.get(*class).stats())
            .collect()
    }
}

impl Default for RateLimiters {
    fn default() -> Self {
        Self::from_config(&RateLimitsConfig::default())
    }
}
