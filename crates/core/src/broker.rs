//! Brokerage seam: the operations the trader consumes and their data types.

use crate::error::BrokerResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Account state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub status: String,
    pub cash: Decimal,
    pub portfolio_value: Decimal,
    pub buying_power: Decimal,
    pub equity: Decimal,
}

impl Account {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status.eq_ignore_ascii_case("ACTIVE")
    }
}

/// A listed instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub symbol: String,
    pub name: String,
    pub tradable: bool,
    pub status: String,
}

/// A position as reported by the brokerage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub qty: i64,
    pub market_value: Decimal,
    /// Unrealized P&L as a fraction of cost basis.
    pub unrealized_plpc: Decimal,
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }

    /// Sign applied to a quantity when updating a position.
    #[must_use]
    pub const fn sign(self) -> i64 {
        match self {
            Self::Buy => 1,
            Self::Sell => -1,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

/// Time in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    Day,
    Gtc,
}

/// An order to submit.
///
/// `client_order_id` is generated once per trading decision. Every retry of
/// the same submission reuses it so the brokerage can reject a duplicate
/// instead of filling twice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub qty: i64,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub client_order_id: String,
}

impl OrderRequest {
    /// Market order, good till cancelled, with a fresh client order id.
    pub fn market(symbol: impl Into<String>, qty: i64, side: OrderSide) -> Self {
        Self {
            symbol: symbol.into(),
            qty,
            side,
            order_type: OrderType::Market,
            time_in_force: TimeInForce::Gtc,
            client_order_id: Uuid::new_v4().to_string(),
        }
    }
}

/// Brokerage acknowledgement of a submitted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub status: String,
    pub submitted_at: Option<DateTime<Utc>>,
}

/// Remote brokerage operations used by the trader.
///
/// Implementations perform exactly one remote call per method; retries and
/// rate limiting belong to the request executor.
#[async_trait]
pub trait BrokerApi: Send + Sync {
    async fn get_account(&self) -> BrokerResult<Account>;

    /// Price of the most recent trade.
    async fn latest_price(&self, symbol: &str) -> BrokerResult<Decimal>;

    async fn submit_order(&self, order: &OrderRequest) -> BrokerResult<OrderAck>;

    /// Open position for `symbol`, `None` when flat.
    async fn get_position(&self, symbol: &str) -> BrokerResult<Option<BrokerPosition>>;

    /// Every open position.
    async fn list_positions(&self) -> BrokerResult<Vec<BrokerPosition>>;

    async fn list_assets(&self) -> BrokerResult<Vec<Asset>>;
}
