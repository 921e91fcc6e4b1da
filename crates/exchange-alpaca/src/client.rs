//! Alpaca paper-trading REST client.
//!
//! Each method performs exactly one HTTP request. Rate limiting and retries
//! are applied by the [`RequestExecutor`](crate::RequestExecutor) around it.
//!
//! # Example
//!
//! ```ignore
//! use qtrade_alpaca::{AlpacaClient, AlpacaClientConfig};
//!
//! let client = AlpacaClient::new(AlpacaClientConfig::from_broker_config(&config.broker))?;
//! let account = client.account().await?;
//! println!("equity: {}", account.equity);
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qtrade_core::config::{ALPACA_DATA_URL, ALPACA_PAPER_URL};
use qtrade_core::{
    Account, Asset, BrokerApi, BrokerConfig, BrokerError, BrokerPosition, BrokerResult, OrderAck,
    OrderRequest,
};
use reqwest::{Client, RequestBuilder, StatusCode};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the Alpaca client.
pub struct AlpacaClientConfig {
    /// Trading API base URL.
    pub api_url: String,

    /// Market data API base URL.
    pub data_url: String,

    pub key_id: String,

    pub secret_key: SecretString,

    /// Transport timeout in seconds.
    pub timeout_secs: u64,
}

impl std::fmt::Debug for AlpacaClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlpacaClientConfig")
            .field("api_url", &self.api_url)
            .field("data_url", &self.data_url)
            .field("key_id", &self.key_id)
            .field("secret_key", &"[REDACTED]")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for AlpacaClientConfig {
    fn default() -> Self {
        Self {
            api_url: ALPACA_PAPER_URL.to_string(),
            data_url: ALPACA_DATA_URL.to_string(),
            key_id: String::new(),
            secret_key: SecretString::from(String::new()),
            timeout_secs: 15,
        }
    }
}

impl AlpacaClientConfig {
    #[must_use]
    pub fn from_broker_config(config: &BrokerConfig) -> Self {
        Self {
            api_url: config.api_url.clone(),
            data_url: config.data_url.clone(),
            key_id: config.key_id.clone(),
            secret_key: SecretString::from(config.secret_key.clone()),
            timeout_secs: config.timeout_secs,
        }
    }

    /// Sets both base URLs (useful for testing).
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.api_url.clone_from(&url);
        self.data_url = url;
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, key_id: impl Into<String>, secret_key: impl Into<String>) -> Self {
        self.key_id = key_id.into();
        self.secret_key = SecretString::from(secret_key.into());
        self
    }
}

// =============================================================================
// API Response Types
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
struct RawAccount {
    id: String,
    status: String,
    cash: Decimal,
    portfolio_value: Option<Decimal>,
    buying_power: Decimal,
    equity: Decimal,
}

impl From<RawAccount> for Account {
    fn from(raw: RawAccount) -> Self {
        Self {
            id: raw.id,
            status: raw.status,
            cash: raw.cash,
            portfolio_value: raw.portfolio_value.unwrap_or(raw.equity),
            buying_power: raw.buying_power,
            equity: raw.equity,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawLatestTrade {
    trade: RawTrade,
}

#[derive(Debug, Clone, Deserialize)]
struct RawTrade {
    #[serde(rename = "p")]
    price: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
struct RawPosition {
    symbol: String,
    qty: Decimal,
    market_value: Option<Decimal>,
    unrealized_plpc: Option<Decimal>,
}

impl From<RawPosition> for BrokerPosition {
    fn from(raw: RawPosition) -> Self {
        Self {
            symbol: raw.symbol,
            qty: raw.qty.trunc().to_i64().unwrap_or_default(),
            market_value: raw.market_value.unwrap_or_default(),
            unrealized_plpc: raw.unrealized_plpc.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawOrder {
    id: String,
    client_order_id: Option<String>,
    symbol: String,
    status: Option<String>,
    submitted_at: Option<String>,
}

impl From<RawOrder> for OrderAck {
    fn from(raw: RawOrder) -> Self {
        Self {
            id: raw.id,
            client_order_id: raw.client_order_id.unwrap_or_default(),
            symbol: raw.symbol,
            status: raw.status.unwrap_or_else(|| "new".to_string()),
            submitted_at: raw.submitted_at.and_then(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .ok()
                    .map(|d| d.with_timezone(&Utc))
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawAsset {
    symbol: String,
    name: Option<String>,
    tradable: bool,
    status: Option<String>,
}

impl From<RawAsset> for Asset {
    fn from(raw: RawAsset) -> Self {
        Self {
            symbol: raw.symbol,
            name: raw.name.unwrap_or_default(),
            tradable: raw.tradable,
            status: raw.status.unwrap_or_default(),
        }
    }
}

/// Order body in the wire format (quantities are strings).
#[derive(Debug, Serialize)]
struct OrderBody<'a> {
    symbol: &'a str,
    qty: String,
    side: &'a str,
    #[serde(rename = "type")]
    order_type: qtrade_core::OrderType,
    time_in_force: qtrade_core::TimeInForce,
    client_order_id: &'a str,
}

impl<'a> From<&'a OrderRequest> for OrderBody<'a> {
    fn from(order: &'a OrderRequest) -> Self {
        Self {
            symbol: &order.symbol,
            qty: order.qty.to_string(),
            side: order.side.as_str(),
            order_type: order.order_type,
            time_in_force: order.time_in_force,
            client_order_id: &order.client_order_id,
        }
    }
}

// =============================================================================
// AlpacaClient
// =============================================================================

/// Alpaca REST API client.
pub struct AlpacaClient {
    config: AlpacaClientConfig,
    http: Client,
}

impl std::fmt::Debug for AlpacaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlpacaClient")
            .field("api_url", &self.config.api_url)
            .field("data_url", &self.config.data_url)
            .finish_non_exhaustive()
    }
}

fn transport_error(err: reqwest::Error) -> BrokerError {
    if err.is_timeout() {
        BrokerError::Timeout(err.to_string())
    } else if err.is_decode() {
        BrokerError::Serialization(err.to_string())
    } else {
        BrokerError::Network(err.to_string())
    }
}

impl AlpacaClient {
    /// Creates a new client with the given configuration.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: AlpacaClientConfig) -> BrokerResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BrokerError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { config, http })
    }

    /// Creates a client from the application's broker section.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn from_broker_config(config: &BrokerConfig) -> BrokerResult<Self> {
        Self::new(AlpacaClientConfig::from_broker_config(config))
    }

    #[must_use]
    pub fn api_url(&self) -> &str {
        &self.config.api_url
    }

    /// Validates a symbol before it is placed in a URL path.
    ///
    /// Valid symbols are 1-16 ASCII alphanumerics, optionally with `.` or `-`
    /// (e.g. "AAPL", "BRK.B").
    fn validate_symbol(symbol: &str) -> BrokerResult<&str> {
        if symbol.is_empty() {
            return Err(BrokerError::InvalidRequest("symbol cannot be empty".to_string()));
        }

        if symbol.contains("..") || symbol.contains('/') || symbol.contains('\\') {
            return Err(BrokerError::InvalidRequest(format!(
                "invalid symbol: contains forbidden characters: {symbol}"
            )));
        }

        if !symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
        {
            return Err(BrokerError::InvalidRequest(format!(
                "invalid symbol: must be alphanumeric: {symbol}"
            )));
        }

        if symbol.len() > 16 {
            return Err(BrokerError::InvalidRequest(format!(
                "invalid symbol: exceeds maximum length of 16: {}",
                symbol.len()
            )));
        }

        Ok(symbol)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("APCA-API-KEY-ID", &self.config.key_id)
            .header("APCA-API-SECRET-KEY", self.config.secret_key.expose_secret())
            .header("Accept", "application/json")
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, url: &str) -> BrokerResult<T> {
        tracing::debug!("GET {}", url);

        let response = self
            .authorized(self.http.get(url))
            .send()
            .await
            .map_err(transport_error)?;

        Self::handle_response(response).await
    }

    async fn post<T: serde::de::DeserializeOwned, B: Serialize>(
        &self,
        url: &str,
        body: &B,
    ) -> BrokerResult<T> {
        tracing::debug!("POST {}", url);

        let response = self
            .authorized(self.http.post(url))
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        Self::handle_response(response).await
    }

    /// Converts non-success statuses into typed errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> BrokerResult<T> {
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            return Err(BrokerError::rate_limit(retry_after));
        }

        if status == StatusCode::NOT_FOUND {
            let text = response.text().await.unwrap_or_default();
            return Err(BrokerError::NotFound(text));
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BrokerError::api(status.as_u16(), text));
        }

        response.json::<T>().await.map_err(transport_error)
    }

    // =========================================================================
    // Account Endpoints
    // =========================================================================

    /// Gets the trading account.
    ///
    /// # Errors
    /// Returns error if the API call fails.
    pub async fn account(&self) -> BrokerResult<Account> {
        let url = format!("{}/v2/account", self.config.api_url);
        let raw: RawAccount = self.get(&url).await?;
        Ok(raw.into())
    }

    /// Gets the open position for a symbol, `None` when flat.
    ///
    /// # Errors
    /// Returns error if the symbol is invalid or the API call fails.
    pub async fn position(&self, symbol: &str) -> BrokerResult<Option<BrokerPosition>> {
        let symbol = Self::validate_symbol(symbol)?;
        let url = format!("{}/v2/positions/{}", self.config.api_url, symbol);

        match self.get::<RawPosition>(&url).await {
            Ok(raw) => Ok(Some(raw.into())),
            Err(BrokerError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Lists all open positions.
    ///
    /// # Errors
    /// Returns error if the API call fails.
    pub async fn positions(&self) -> BrokerResult<Vec<BrokerPosition>> {
        let url = format!("{}/v2/positions", self.config.api_url);
        let raw: Vec<RawPosition> = self.get(&url).await?;
        Ok(raw.into_iter().map(BrokerPosition::from).collect())
    }

    /// Lists active US equities.
    ///
    /// # Errors
    /// Returns error if the API call fails.
    pub async fn assets(&self) -> BrokerResult<Vec<Asset>> {
        let url = format!(
            "{}/v2/assets?status=active&asset_class=us_equity",
            self.config.api_url
        );
        let raw: Vec<RawAsset> = self.get(&url).await?;
        Ok(raw.into_iter().map(Asset::from).collect())
    }

    // =========================================================================
    // Market Data Endpoints
    // =========================================================================

    /// Gets the price of the latest trade.
    ///
    /// # Errors
    /// Returns error if the symbol is invalid or the API call fails.
    pub async fn latest_trade_price(&self, symbol: &str) -> BrokerResult<Decimal> {
        let symbol = Self::validate_symbol(symbol)?;
        let url = format!("{}/v2/stocks/{}/trades/latest", self.config.data_url, symbol);
        let raw: RawLatestTrade = self.get(&url).await?;
        Ok(raw.trade.price)
    }

    // =========================================================================
    // Order Endpoints
    // =========================================================================

    /// Submits an order.
    ///
    /// # Errors
    /// Returns error if the order is invalid or the API call fails.
    pub async fn place_order(&self, order: &OrderRequest) -> BrokerResult<OrderAck> {
        Self::validate_symbol(&order.symbol)?;
        if order.qty <= 0 {
            return Err(BrokerError::InvalidRequest(format!(
                "order quantity must be positive, got {}",
                order.qty
            )));
        }

        let url = format!("{}/v2/orders", self.config.api_url);
        let raw: RawOrder = self.post(&url, &OrderBody::from(order)).await?;
        Ok(raw.into())
    }
}

#[async_trait]
impl BrokerApi for AlpacaClient {
    async fn get_account(&self) -> BrokerResult<Account> {
        self.account().await
    }

    async fn latest_price(&self, symbol: &str) -> BrokerResult<Decimal> {
        self.latest_trade_price(symbol).await
    }

    async fn submit_order(&self, order: &OrderRequest) -> BrokerResult<OrderAck> {
        self.place_order(order).await
    }

    async fn get_position(&self, symbol: &str) -> BrokerResult<Option<BrokerPosition>> {
        self.position(symbol).await
    }

    async fn list_positions(&self) -> BrokerResult<Vec<BrokerPosition>> {
        self.positions().await
    }

    async fn list_assets(&self) -> BrokerResult<Vec<Asset>> {
        self.assets().await
    }
}
