use crate::broker::{BrokerPosition, OrderSide};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Action chosen by the trading policy for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
}

impl TradeAction {
    /// All actions, in tie-break order.
    pub const ALL: [Self; 3] = [Self::Buy, Self::Sell, Self::Hold];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
            Self::Hold => "hold",
        }
    }

    /// Order side for this action; `None` for hold.
    #[must_use]
    pub const fn order_side(self) -> Option<OrderSide> {
        match self {
            Self::Buy => Some(OrderSide::Buy),
            Self::Sell => Some(OrderSide::Sell),
            Self::Hold => None,
        }
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(Self::Buy),
            "sell" => Ok(Self::Sell),
            "hold" => Ok(Self::Hold),
            other => Err(format!("unknown trade action: {other}")),
        }
    }
}

/// Executed trade, emitted once per submitted order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeUpdate {
    pub symbol: String,
    pub action: TradeAction,
    /// Price observed when the decision was made.
    pub price: f64,
    pub quantity: i64,
    pub client_order_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-symbol outcome of one observe/decide/act/learn pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionUpdate {
    pub symbol: String,
    pub state: String,
    pub action: TradeAction,
    pub price_before: f64,
    pub price_after: Option<f64>,
    /// `None` when the re-observation failed and no learning happened.
    pub reward: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Portfolio snapshot, emitted once per cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioUpdate {
    /// In-memory ledger, signed share counts.
    pub positions: BTreeMap<String, i64>,
    /// Positions as reported by the brokerage, when fetched.
    pub broker_positions: Vec<BrokerPosition>,
    pub timestamp: DateTime<Utc>,
}

/// Account balance snapshot with hourly and daily change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceUpdate {
    pub timestamp: DateTime<Utc>,
    pub total_equity: Decimal,
    pub cash_balance: Decimal,
    pub buying_power: Decimal,
    pub hourly_change: Decimal,
    pub hourly_change_pct: f64,
    pub daily_change: Decimal,
    pub daily_change_pct: f64,
    pub account_status: String,
}

/// Learning statistics of the trading policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentStats {
    pub total_actions: u64,
    pub exploration_actions: u64,
    pub exploitation_actions: u64,
    pub cold_start_actions: u64,
    pub num_updates: u64,
    pub cumulative_reward: f64,
    pub states_visited: usize,
    pub q_entries: usize,
}

/// Summary of one full pass over all symbols.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleSummary {
    pub cycle: u64,
    pub processed: usize,
    pub skipped: usize,
    pub trades: usize,
    pub agent: AgentStats,
    pub timestamp: DateTime<Utc>,
}

/// Events streamed to the dashboard. Fire-and-forget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BotEvent {
    TradeUpdate(TradeUpdate),
    Decision(DecisionUpdate),
    PortfolioUpdate(PortfolioUpdate),
    BalanceUpdate(BalanceUpdate),
    CycleCompleted(CycleSummary),
    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl BotEvent {
    /// Creates an error event stamped now.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Wire name of the event, as used in the `type` tag.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TradeUpdate(_) => "trade_update",
            Self::Decision(_) => "decision",
            Self::PortfolioUpdate(_) => "portfolio_update",
            Self::BalanceUpdate(_) => "balance_update",
            Self::CycleCompleted(_) => "cycle_completed",
            Self::Error { .. } => "error",
        }
    }
}
