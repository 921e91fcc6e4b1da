//! Simulated brokerage for offline runs and tests.
//!
//! `PaperBroker` implements [`BrokerApi`] without touching the network:
//! prices follow a seeded random walk per symbol, market orders fill
//! immediately at the current price, and cash and positions are tracked in
//! memory. Reusing a `client_order_id` is rejected the way the real
//! brokerage rejects it.
//!
//! # Example
//!
//! ```ignore
//! use qtrade_alpaca::{PaperBroker, PaperBrokerConfig};
//!
//! let broker = PaperBroker::new(PaperBrokerConfig::seeded(7));
//! let price = broker.latest_price("AAPL").await?;
//! ```

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use qtrade_core::{
    Account, Asset, BrokerApi, BrokerConfig, BrokerError, BrokerPosition, BrokerResult, OrderAck,
    OrderRequest,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Symbols listed by the simulated brokerage.
const LISTED_SYMBOLS: &[(&str, &str, bool)] = &[
    ("AAPL", "Apple Inc.", true),
    ("GOOGL", "Alphabet Inc. Class A", true),
    ("MSFT", "Microsoft Corporation", true),
    ("AMZN", "Amazon.com Inc.", true),
    ("NVDA", "NVIDIA Corporation", true),
    ("META", "Meta Platforms Inc.", true),
    ("TSLA", "Tesla Inc.", true),
    ("JPM", "JPMorgan Chase & Co.", true),
    ("V", "Visa Inc.", true),
    ("WMT", "Walmart Inc.", true),
    ("KO", "Coca-Cola Company", true),
    ("HALT", "Halted Holdings", false),
];

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct PaperBrokerConfig {
    pub starting_cash: Decimal,

    /// Maximum relative price move per quote, e.g. 0.002 for 0.2%.
    pub volatility: f64,

    /// Optional random seed for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for PaperBrokerConfig {
    fn default() -> Self {
        Self {
            starting_cash: Decimal::from(100_000),
            volatility: 0.002,
            seed: None,
        }
    }
}

impl PaperBrokerConfig {
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Default::default()
        }
    }

    /// Prices never move; handy for deterministic tests.
    #[must_use]
    pub fn frozen() -> Self {
        Self {
            volatility: 0.0,
            seed: Some(0),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn from_broker_config(config: &BrokerConfig) -> Self {
        Self {
            starting_cash: Decimal::try_from(config.paper_starting_cash)
                .unwrap_or_else(|_| Decimal::from(100_000)),
            volatility: config.paper_volatility.max(0.0),
            seed: config.paper_seed,
        }
    }
}

// =============================================================================
// PaperBroker
// =============================================================================

#[derive(Debug)]
struct Holding {
    qty: i64,
    /// Signed cost of the open quantity.
    cost: Decimal,
}

#[derive(Debug)]
struct PaperState {
    rng: StdRng,
    cash: Decimal,
    prices: HashMap<String, Decimal>,
    holdings: HashMap<String, Holding>,
    client_order_ids: HashSet<String>,
}

impl PaperState {
    fn price_of(&mut self, symbol: &str) -> Decimal {
        if let Some(price) = self.prices.get(symbol) {
            return *price;
        }
        let cents: i64 = self.rng.gen_range(5_000..50_000);
        let price = Decimal::new(cents, 2);
        self.prices.insert(symbol.to_string(), price);
        price
    }

    fn step(&mut self, symbol: &str, volatility: f64) -> Decimal {
        let current = self.price_of(symbol);
        if volatility <= 0.0 {
            return current;
        }

        let shock = self.rng.gen_range(-volatility..=volatility);
        let factor = Decimal::try_from(1.0 + shock).unwrap_or(Decimal::ONE);
        let next = (current * factor).round_dp(2).max(Decimal::new(1, 2));
        self.prices.insert(symbol.to_string(), next);
        next
    }

    fn position(&mut self, symbol: &str) -> Option<BrokerPosition> {
        let (qty, cost) = self.holdings.get(symbol).map(|h| (h.qty, h.cost))?;

        let market_value = self.price_of(symbol) * Decimal::from(qty);
        let unrealized_plpc = if cost.is_zero() {
            Decimal::ZERO
        } else {
            ((market_value - cost) / cost.abs()).round_dp(4)
        };

        Some(BrokerPosition {
            symbol: symbol.to_string(),
            qty,
            market_value,
            unrealized_plpc,
        })
    }

    fn equity(&self) -> Decimal {
        let positions: Decimal = self
            .holdings
            .iter()
            .map(|(symbol, holding)| {
                let price = self.prices.get(symbol).copied().unwrap_or_default();
                price * Decimal::from(holding.qty)
            })
            .sum();
        self.cash + positions
    }
}

/// In-memory brokerage with simulated prices and instant fills.
#[derive(Debug)]
pub struct PaperBroker {
    config: PaperBrokerConfig,
    state: Mutex<PaperState>,
}

impl PaperBroker {
    #[must_use]
    pub fn new(config: PaperBrokerConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let state = PaperState {
            rng,
            cash: config.starting_cash,
            prices: HashMap::new(),
            holdings: HashMap::new(),
            client_order_ids: HashSet::new(),
        };

        Self {
            config,
            state: Mutex::new(state),
        }
    }

    /// Pins the current price of a symbol.
    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.state.lock().prices.insert(symbol.to_string(), price);
    }

    #[must_use]
    pub fn cash(&self) -> Decimal {
        self.state.lock().cash
    }

    /// Number of distinct orders accepted so far.
    #[must_use]
    pub fn orders_accepted(&self) -> usize {
        self.state.lock().client_order_ids.len()
    }
}

#[async_trait]
impl BrokerApi for PaperBroker {
    async fn get_account(&self) -> BrokerResult<Account> {
        let state = self.state.lock();
        let equity = state.equity();

        Ok(Account {
            id: "paper".to_string(),
            status: "ACTIVE".to_string(),
            cash: state.cash,
            portfolio_value: equity,
            buying_power: state.cash.max(Decimal::ZERO),
            equity,
        })
    }

    async fn latest_price(&self, symbol: &str) -> BrokerResult<Decimal> {
        if symbol.is_empty() {
            return Err(BrokerError::InvalidRequest("symbol cannot be empty".to_string()));
        }
        Ok(self.state.lock().step(symbol, self.config.volatility))
    }

    async fn submit_order(&self, order: &OrderRequest) -> BrokerResult<OrderAck> {
        if order.qty <= 0 {
            return Err(BrokerError::InvalidRequest(format!(
                "order quantity must be positive, got {}",
                order.qty
            )));
        }

        let mut state = self.state.lock();
        if !state.client_order_ids.insert(order.client_order_id.clone()) {
            return Err(BrokerError::api(422, "client_order_id must be unique"));
        }

        let price = state.price_of(&order.symbol);
        let signed_qty = order.side.sign() * order.qty;
        let notional = price * Decimal::from(signed_qty);
        state.cash -= notional;

        let holding = state
            .holdings
            .entry(order.symbol.clone())
            .or_insert(Holding {
                qty: 0,
                cost: Decimal::ZERO,
            });
        holding.qty += signed_qty;
        holding.cost += notional;
        if holding.qty == 0 {
            state.holdings.remove(&order.symbol);
        }

        tracing::info!(
            symbol = %order.symbol,
            side = %order.side,
            qty = order.qty,
            price = %price,
            client_order_id = %order.client_order_id,
            "paper fill simulated"
        );

        Ok(OrderAck {
            id: Uuid::new_v4().to_string(),
            client_order_id: order.client_order_id.clone(),
            symbol: order.symbol.clone(),
            status: "filled".to_string(),
            submitted_at: Some(Utc::now()),
        })
    }

    async fn get_position(&self, symbol: &str) -> BrokerResult<Option<BrokerPosition>> {
        Ok(self.state.lock().position(symbol))
    }

    async fn list_positions(&self) -> BrokerResult<Vec<BrokerPosition>> {
        let mut state = self.state.lock();
        let mut symbols: Vec<String> = state.holdings.keys().cloned().collect();
        symbols.sort();

        Ok(symbols
            .iter()
            .filter_map(|symbol| state.position(symbol))
            .collect())
    }

    async fn list_assets(&self) -> BrokerResult<Vec<Asset>> {
        Ok(LISTED_SYMBOLS
            .iter()
            .map(|(symbol, name, tradable)| Asset {
                symbol: (*symbol).to_string(),
                name: (*name).to_string(),
                tradable: *tradable,
                status: "active".to_string(),
            })
            .collect())
    }
}
