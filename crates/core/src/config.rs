use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default paper-trading REST endpoint.
pub const ALPACA_PAPER_URL: &str = "https://paper-api.alpaca.markets";

/// Default market data REST endpoint.
pub const ALPACA_DATA_URL: &str = "https://data.alpaca.markets";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub broker: BrokerConfig,
    pub trading: TradingConfig,
    pub agent: AgentConfig,
    pub rate_limits: RateLimitsConfig,
    pub retry: RetryConfig,
    pub balance: BalanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Which brokerage implementation backs the trader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    /// Alpaca paper-trading REST API.
    #[default]
    Alpaca,
    /// In-process simulated broker (no network).
    Paper,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub kind: BrokerKind,
    pub api_url: String,
    pub data_url: String,
    pub key_id: String,
    pub secret_key: String,
    /// HTTP client timeout for a single request.
    pub timeout_secs: u64,
    /// Seed for the simulated broker's price walk.
    pub paper_seed: Option<u64>,
    pub paper_starting_cash: f64,
    /// Max relative move per simulated price observation.
    pub paper_volatility: f64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            kind: BrokerKind::Alpaca,
            api_url: ALPACA_PAPER_URL.to_string(),
            data_url: ALPACA_DATA_URL.to_string(),
            key_id: String::new(),
            secret_key: String::new(),
            timeout_secs: 15,
            paper_seed: None,
            paper_starting_cash: 100_000.0,
            paper_volatility: 0.002,
        }
    }
}

impl std::fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("kind", &self.kind)
            .field("api_url", &self.api_url)
            .field("data_url", &self.data_url)
            .field("key_id", &self.key_id)
            .field("secret_key", &"<redacted>")
            .field("timeout_secs", &self.timeout_secs)
            .field("paper_seed", &self.paper_seed)
            .finish_non_exhaustive()
    }
}

impl BrokerConfig {
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.key_id.is_empty() && !self.secret_key.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    /// Symbols traded each cycle, in processing order.
    pub symbols: Vec<String>,
    /// Discover tradable assets when `symbols` is empty.
    pub discover_symbols: bool,
    pub max_symbols: usize,
    /// Shares per order.
    pub position_size: i64,
    pub settle_delay_ms: u64,
    pub cycle_interval_secs: u64,
    pub error_backoff_secs: u64,
    /// Include the broker's own position records in each portfolio update.
    pub fetch_broker_positions: bool,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            symbols: vec![
                "AAPL".to_string(),
                "GOOGL".to_string(),
                "MSFT".to_string(),
                "AMZN".to_string(),
            ],
            discover_symbols: false,
            max_symbols: 10,
            position_size: 100,
            settle_delay_ms: 1_000,
            cycle_interval_secs: 5,
            error_backoff_secs: 5,
            fetch_broker_positions: true,
        }
    }
}

impl TradingConfig {
    #[must_use]
    pub const fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    #[must_use]
    pub const fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    #[must_use]
    pub const fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Exploration probability.
    pub epsilon: f64,
    /// Alpha.
    pub learning_rate: f64,
    /// Gamma.
    pub discount_factor: f64,
    /// Relative price move below which a symbol counts as stable.
    pub min_price_change: f64,
    /// Fixed RNG seed; entropy-seeded when absent.
    pub seed: Option<u64>,
    /// Q-table snapshot loaded at startup and written at shutdown.
    pub q_table_path: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.3,
            learning_rate: 0.1,
            discount_factor: 0.95,
            min_price_change: 0.001,
            seed: None,
            q_table_path: None,
        }
    }
}

/// Token bucket parameters for one endpoint class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketConfig {
    pub max_tokens: f64,
    /// Tokens added per `refill_period_secs`.
    pub refill_rate: f64,
    pub refill_period_secs: f64,
}

impl BucketConfig {
    /// Bucket allowing `calls` requests per minute.
    #[must_use]
    pub const fn per_minute(calls: f64) -> Self {
        Self {
            max_tokens: calls,
            refill_rate: calls,
            refill_period_secs: 60.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitsConfig {
    pub market_data: BucketConfig,
    pub account: BucketConfig,
    pub orders: BucketConfig,
    pub positions: BucketConfig,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            market_data: BucketConfig::per_minute(50.0),
            account: BucketConfig::per_minute(25.0),
            orders: BucketConfig::per_minute(10.0),
            positions: BucketConfig::per_minute(15.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Upper bound on a single remote call.
    pub call_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 3_000,
            max_delay_ms: 30_000,
            call_timeout_ms: 10_000,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Exponential backoff for a zero-based attempt: `min(base * 2^attempt, max)`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        let millis = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceConfig {
    pub enabled: bool,
    pub poll_interval_secs: u64,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: 10,
        }
    }
}

impl BalanceConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

fn check_unit_interval(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        bail!("{name} must be within [0, 1], got {value}");
    }
    Ok(())
}

fn check_bucket(name: &str, bucket: &BucketConfig) -> Result<()> {
    if bucket.max_tokens <= 0.0 || bucket.refill_rate <= 0.0 || bucket.refill_period_secs <= 0.0 {
        bail!("rate_limits.{name} must have positive max_tokens, refill_rate and refill_period_secs");
    }
    Ok(())
}

impl AppConfig {
    /// Checks the configuration for values the trader cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.trading.symbols.is_empty() && !self.trading.discover_symbols {
            bail!("no trading symbols configured and symbol discovery is disabled");
        }
        if self.trading.position_size <= 0 {
            bail!("trading.position_size must be positive");
        }
        if self.trading.discover_symbols && self.trading.max_symbols == 0 {
            bail!("trading.max_symbols must be positive when discovery is enabled");
        }

        check_unit_interval("agent.epsilon", self.agent.epsilon)?;
        check_unit_interval("agent.learning_rate", self.agent.learning_rate)?;
        check_unit_interval("agent.discount_factor", self.agent.discount_factor)?;
        if self.agent.min_price_change < 0.0 {
            bail!("agent.min_price_change must not be negative");
        }

        check_bucket("market_data", &self.rate_limits.market_data)?;
        check_bucket("account", &self.rate_limits.account)?;
        check_bucket("orders", &self.rate_limits.orders)?;
        check_bucket("positions", &self.rate_limits.positions)?;

        if self.retry.max_retries == 0 {
            bail!("retry.max_retries must be at least 1");
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            bail!("retry.base_delay_ms must not exceed retry.max_delay_ms");
        }

        if self.broker.kind == BrokerKind::Alpaca && !self.broker.has_credentials() {
            bail!("Alpaca API credentials are missing (set APCA_API_KEY_ID and APCA_API_SECRET_KEY)");
        }

        Ok(())
    }
}
