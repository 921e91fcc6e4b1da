//! Alpaca paper-trading integration for the Q-learning trader.
//!
//! This crate provides:
//! - REST client for the account, market data, order, position and asset endpoints
//! - Per-endpoint-class token-bucket rate limiters with adaptive degradation
//! - A request executor adding retries, backoff, timeouts and error classification
//! - An in-memory paper broker for offline runs and tests
//!
//! # Example
//!
//! ```ignore
//! use qtrade_alpaca::{AlpacaClient, EndpointClass, RateLimiters, RequestExecutor};
//! use qtrade_core::{BrokerApi, Shutdown};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = qtrade_core::ConfigLoader::load("config/Config.toml")?;
//!     let client = AlpacaClient::from_broker_config(&config.broker)?;
//!     let executor = RequestExecutor::new(
//!         Arc::new(RateLimiters::from_config(&config.rate_limits)),
//!         config.retry.clone(),
//!         Shutdown::never(),
//!     );
//!
//!     let price = executor
//!         .execute(EndpointClass::MarketData, "latest_price", || client.latest_price("AAPL"))
//!         .await?;
//!     println!("AAPL: {price:?}");
//!     Ok(())
//! }
//! ```
//!
//! # Authentication
//!
//! Requests carry the `APCA-API-KEY-ID` and `APCA-API-SECRET-KEY` headers.
//! Credentials come from the `[broker]` config section or the standard
//! `APCA_API_KEY_ID` / `APCA_API_SECRET_KEY` environment variables.

pub mod client;
pub mod executor;
pub mod paper;
pub mod rate_limiter;

pub use client::{AlpacaClient, AlpacaClientConfig};
pub use executor::{ExecutorError, ExecutorStats, RequestExecutor};
pub use paper::{PaperBroker, PaperBrokerConfig};
pub use rate_limiter::{
    EndpointClass, LimiterStats, RateLimiter, RateLimiters, DEGRADED_CAPACITY,
    DEGRADE_ERROR_THRESHOLD, ERROR_WINDOW, MAX_WAIT_ROUNDS,
};

use qtrade_core::{BrokerApi, BrokerConfig, BrokerKind};
use std::sync::Arc;

/// Builds the brokerage selected by `config.kind`.
///
/// # Errors
/// Returns error if the HTTP client cannot be built.
pub fn connect(config: &BrokerConfig) -> qtrade_core::BrokerResult<Arc<dyn BrokerApi>> {
    match config.kind {
        BrokerKind::Alpaca => Ok(Arc::new(AlpacaClient::from_broker_config(config)?)),
        BrokerKind::Paper => Ok(Arc::new(PaperBroker::new(
            PaperBrokerConfig::from_broker_config(config),
        ))),
    }
}
