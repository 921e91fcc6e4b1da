use anyhow::{bail, Context, Result};
use chrono::Utc;
use futures_util::FutureExt;
use qtrade_agent::{compute_reward, MarketState, QLearningAgent, QTable, StateDiscretizer};
use qtrade_alpaca::{EndpointClass, ExecutorError, RequestExecutor};
use qtrade_core::{
    AgentConfig, AppConfig, BotEvent, BrokerApi, BrokerPosition, CycleSummary, DecisionUpdate,
    OrderRequest, OrderSide, PortfolioUpdate, PositionLedger, Shutdown, TradeAction, TradeUpdate,
    TradingConfig,
};
use rust_decimal::prelude::ToPrimitive;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Result of one observe, decide, act, re-observe, learn pass.
#[derive(Debug, Clone, PartialEq)]
pub enum SymbolOutcome {
    /// No usable price; nothing happened for this symbol.
    Skipped,
    Processed {
        state: MarketState,
        action: TradeAction,
        traded: bool,
        /// `None` when the re-observation failed and learning was skipped.
        reward: Option<f64>,
    },
}

/// Builds the agent, restoring a saved Q-table when one is configured and present.
#[must_use]
pub fn load_agent(config: &AgentConfig) -> QLearningAgent {
    let agent = QLearningAgent::from_config(config);

    match &config.q_table_path {
        Some(path) if path.exists() => match QTable::load(path) {
            Ok(table) => agent.with_table(table),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable Q-table snapshot");
                agent
            }
        },
        _ => agent,
    }
}

/// Drives the per-symbol trading loop.
///
/// Owns the Q-learning agent, position ledger and last prices; nothing else
/// mutates them, so symbols are processed strictly one after another.
pub struct TradingCycle {
    broker: Arc<dyn BrokerApi>,
    executor: Arc<RequestExecutor>,
    agent: QLearningAgent,
    discretizer: StateDiscretizer,
    ledger: PositionLedger,
    last_prices: HashMap<String, f64>,
    symbols: Vec<String>,
    config: TradingConfig,
    q_table_path: Option<PathBuf>,
    event_tx: broadcast::Sender<BotEvent>,
    shutdown: Shutdown,
    cycles: u64,
}

impl TradingCycle {
    #[must_use]
    pub fn new(
        config: &AppConfig,
        broker: Arc<dyn BrokerApi>,
        executor: Arc<RequestExecutor>,
        event_tx: broadcast::Sender<BotEvent>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            broker,
            executor,
            agent: load_agent(&config.agent),
            discretizer: StateDiscretizer::new(config.agent.min_price_change),
            ledger: PositionLedger::new(),
            last_prices: HashMap::new(),
            symbols: config.trading.symbols.clone(),
            config: config.trading.clone(),
            q_table_path: config.agent.q_table_path.clone(),
            event_tx,
            shutdown,
            cycles: 0,
        }
    }

    /// Replaces the agent.
    #[must_use]
    pub fn with_agent(mut self, agent: QLearningAgent) -> Self {
        self.agent = agent;
        self
    }

    #[must_use]
    pub const fn agent(&self) -> &QLearningAgent {
        &self.agent
    }

    #[must_use]
    pub const fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    #[must_use]
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    #[must_use]
    pub fn last_price(&self, symbol: &str) -> Option<f64> {
        self.last_prices.get(symbol).copied()
    }

    /// Runs cycles until shutdown, then saves the Q-table if configured.
    ///
    /// A cycle that fails or panics is logged, reported as an error event and
    /// followed by `error_backoff` before the next one.
    ///
    /// # Errors
    /// Returns an error if there are no symbols to trade.
    pub async fn run(mut self) -> Result<()> {
        self.resolve_symbols().await?;
        tracing::info!(symbols = ?self.symbols, "trading cycle starting");

        let mut shutdown = self.shutdown.clone();
        loop {
            if shutdown.is_triggered() {
                break;
            }

            let outcome = AssertUnwindSafe(self.run_cycle()).catch_unwind().await;
            let pause = match outcome {
                Ok(Ok(summary)) => {
                    tracing::info!(
                        cycle = summary.cycle,
                        processed = summary.processed,
                        skipped = summary.skipped,
                        trades = summary.trades,
                        "cycle completed"
                    );
                    self.config.cycle_interval()
                }
                Ok(Err(_)) if shutdown.is_triggered() => break,
                Ok(Err(e)) => self.cycle_failed(&e.to_string()),
                Err(payload) => self.cycle_failed(panic_message(payload.as_ref())),
            };

            tokio::select! {
                () = tokio::time::sleep(pause) => {}
                () = shutdown.wait() => break,
            }
        }

        self.persist_q_table();
        tracing::info!("trading cycle stopped");
        Ok(())
    }

    /// Fills the symbol list from asset discovery when none are configured.
    ///
    /// # Errors
    /// Returns an error if no symbols are configured and discovery is
    /// disabled, fails, or finds nothing tradable.
    pub async fn resolve_symbols(&mut self) -> Result<()> {
        if !self.symbols.is_empty() {
            return Ok(());
        }
        if !self.config.discover_symbols {
            bail!("no symbols configured and discovery disabled");
        }

        let broker = self.broker.as_ref();
        let assets = self
            .executor
            .execute(EndpointClass::Account, "list_assets", move || broker.list_assets())
            .await
            .context("asset discovery failed")?
            .context("asset listing not permitted")?;

        self.symbols = assets
            .into_iter()
            .filter(|asset| asset.tradable)
            .map(|asset| asset.symbol)
            .take(self.config.max_symbols)
            .collect();

        if self.symbols.is_empty() {
            bail!("asset discovery found no tradable symbols");
        }
        tracing::info!(count = self.symbols.len(), "discovered tradable symbols");
        Ok(())
    }

    /// Processes every symbol once, in order, then emits the portfolio.
    ///
    /// # Errors
    /// Returns an error only when shutdown interrupts the cycle.
    pub async fn run_cycle(&mut self) -> Result<CycleSummary> {
        self.cycles += 1;
        let (mut processed, mut skipped, mut trades) = (0, 0, 0);

        let symbols = self.symbols.clone();
        for symbol in &symbols {
            if self.shutdown.is_triggered() {
                break;
            }

            match self.process_symbol(symbol).await? {
                SymbolOutcome::Skipped => skipped += 1,
                SymbolOutcome::Processed { traded, .. } => {
                    processed += 1;
                    if traded {
                        trades += 1;
                    }
                }
            }
        }

        let broker_positions = if self.config.fetch_broker_positions {
            self.fetch_broker_positions(&symbols).await?
        } else {
            Vec::new()
        };

        self.emit(BotEvent::PortfolioUpdate(PortfolioUpdate {
            positions: self.ledger.snapshot(),
            broker_positions,
            timestamp: Utc::now(),
        }));

        let summary = CycleSummary {
            cycle: self.cycles,
            processed,
            skipped,
            trades,
            agent: self.agent.stats(),
            timestamp: Utc::now(),
        };
        self.emit(BotEvent::CycleCompleted(summary.clone()));

        Ok(summary)
    }

    /// Observe, decide, act, re-observe and learn for one symbol.
    ///
    /// Price and order failures never fail the call; they skip the
    /// affected step.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Cancelled`] if shutdown interrupts the symbol.
    pub async fn process_symbol(&mut self, symbol: &str) -> Result<SymbolOutcome, ExecutorError> {
        let Some(price_before) = self.fetch_price(symbol).await? else {
            tracing::warn!(symbol, "no price available, skipping symbol this cycle");
            return Ok(SymbolOutcome::Skipped);
        };

        let last_price = self.last_price(symbol);
        let state = self
            .discretizer
            .discretize(price_before, self.ledger.get(symbol), last_price);
        let (action, selection) = self.agent.choose(state);
        tracing::debug!(symbol, state = %state, action = %action, ?selection, "action selected");

        let traded = match action.order_side() {
            Some(side) => self.submit_order(symbol, action, side, price_before).await?,
            None => false,
        };

        self.settle().await?;

        let Some(price_after) = self.fetch_price(symbol).await? else {
            tracing::warn!(symbol, "no price after settle, skipping learning");
            self.emit_decision(symbol, state, action, price_before, None, None);
            return Ok(SymbolOutcome::Processed {
                state,
                action,
                traded,
                reward: None,
            });
        };

        let reward = compute_reward(action, price_before, price_after);
        let next_state = self
            .discretizer
            .discretize(price_after, self.ledger.get(symbol), last_price);
        self.agent.update(state, action, reward, next_state);
        self.last_prices.insert(symbol.to_string(), price_after);

        tracing::info!(
            symbol,
            state = %state,
            action = %action,
            reward,
            "symbol processed"
        );
        self.emit_decision(
            symbol,
            state,
            action,
            price_before,
            Some(price_after),
            Some(reward),
        );

        Ok(SymbolOutcome::Processed {
            state,
            action,
            traded,
            reward: Some(reward),
        })
    }

    /// Latest trade price, `None` when unavailable for any reason but shutdown.
    async fn fetch_price(&self, symbol: &str) -> Result<Option<f64>, ExecutorError> {
        let broker = self.broker.as_ref();
        let result = self
            .executor
            .execute(EndpointClass::MarketData, "latest_price", move || {
                broker.latest_price(symbol)
            })
            .await;

        match result {
            Ok(price) => Ok(price.and_then(|p| p.to_f64()).filter(|p| *p > 0.0)),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                tracing::error!(symbol, error = %e, "error getting price");
                Ok(None)
            }
        }
    }

    /// Submits a market order; the ledger moves only if the brokerage accepts it.
    async fn submit_order(
        &mut self,
        symbol: &str,
        action: TradeAction,
        side: OrderSide,
        price: f64,
    ) -> Result<bool, ExecutorError> {
        let order = OrderRequest::market(symbol, self.config.position_size, side);
        let broker = self.broker.as_ref();
        let request = &order;
        let result = self
            .executor
            .execute(EndpointClass::Orders, "submit_order", move || {
                broker.submit_order(request)
            })
            .await;

        match result {
            Ok(Some(ack)) => {
                self.record_trade(&order, action, price, Some(&ack.id));
                Ok(true)
            }
            Ok(None) => {
                tracing::warn!(symbol, side = %side, "order rejected by brokerage");
                Ok(false)
            }
            Err(e) if e.is_already_submitted() => {
                tracing::warn!(
                    symbol,
                    client_order_id = %order.client_order_id,
                    "order acknowledgement lost, brokerage already holds it"
                );
                self.record_trade(&order, action, price, None);
                Ok(true)
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                tracing::error!(symbol, error = %e, "error executing trade");
                Ok(false)
            }
        }
    }

    /// Applies an accepted order to the ledger and broadcasts the trade.
    fn record_trade(
        &mut self,
        order: &OrderRequest,
        action: TradeAction,
        price: f64,
        order_id: Option<&str>,
    ) {
        let position = self.ledger.apply(&order.symbol, order.side, order.qty);
        tracing::info!(
            symbol = %order.symbol,
            side = %order.side,
            qty = order.qty,
            position,
            order_id = order_id.unwrap_or("unknown"),
            "executed order"
        );
        self.emit(BotEvent::TradeUpdate(TradeUpdate {
            symbol: order.symbol.clone(),
            action,
            price,
            quantity: order.qty,
            client_order_id: order.client_order_id.clone(),
            timestamp: Utc::now(),
        }));
    }

    /// Open broker positions for the traded symbols, in one positions call.
    async fn fetch_broker_positions(
        &self,
        symbols: &[String],
    ) -> Result<Vec<BrokerPosition>, ExecutorError> {
        let broker = self.broker.as_ref();
        let result = self
            .executor
            .execute(EndpointClass::Positions, "list_positions", move || {
                broker.list_positions()
            })
            .await;

        match result {
            Ok(positions) => Ok(positions
                .unwrap_or_default()
                .into_iter()
                .filter(|position| symbols.contains(&position.symbol))
                .collect()),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                tracing::debug!(error = %e, "broker positions unavailable");
                Ok(Vec::new())
            }
        }
    }

    async fn settle(&self) -> Result<(), ExecutorError> {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            () = tokio::time::sleep(self.config.settle_delay()) => Ok(()),
            () = shutdown.wait() => Err(ExecutorError::Cancelled {
                operation: "settle".to_string(),
            }),
        }
    }

    fn emit_decision(
        &self,
        symbol: &str,
        state: MarketState,
        action: TradeAction,
        price_before: f64,
        price_after: Option<f64>,
        reward: Option<f64>,
    ) {
        self.emit(BotEvent::Decision(DecisionUpdate {
            symbol: symbol.to_string(),
            state: state.to_string(),
            action,
            price_before,
            price_after,
            reward,
            timestamp: Utc::now(),
        }));
    }

    fn cycle_failed(&self, message: &str) -> Duration {
        tracing::error!(error = message, "error in trading cycle");
        self.emit(BotEvent::error(format!("Trading cycle error: {message}")));
        self.config.error_backoff()
    }

    /// Broadcasts an event (ignore if no receivers).
    fn emit(&self, event: BotEvent) {
        let _ = self.event_tx.send(event);
    }

    fn persist_q_table(&self) {
        let Some(path) = &self.q_table_path else {
            return;
        };
        if let Err(e) = self.agent.table().save(path) {
            tracing::error!(path = %path.display(), error = %e, "failed to save Q-table");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("cycle panicked")
}
