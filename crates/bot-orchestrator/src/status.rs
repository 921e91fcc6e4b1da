use chrono::{DateTime, Utc};
use qtrade_core::{
    AgentStats, BalanceUpdate, BotEvent, DecisionUpdate, PortfolioUpdate, Shutdown, TradeUpdate,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Number of recent trades and decisions kept for the dashboard.
pub const RECENT_LIMIT: usize = 20;

/// Rolling dashboard view of the trader, folded from [`BotEvent`]s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardStatus {
    pub started_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub cycles_completed: u64,
    pub total_trades: u64,

    pub portfolio: Option<PortfolioUpdate>,
    pub balance: Option<BalanceUpdate>,
    pub agent: AgentStats,

    // Most recent first
    pub recent_trades: VecDeque<TradeUpdate>,
    pub recent_decisions: VecDeque<DecisionUpdate>,

    pub error_count: u64,
    pub last_error: Option<String>,
}

impl DashboardStatus {
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            started_at: now,
            last_update: now,
            cycles_completed: 0,
            total_trades: 0,
            portfolio: None,
            balance: None,
            agent: AgentStats::default(),
            recent_trades: VecDeque::with_capacity(RECENT_LIMIT),
            recent_decisions: VecDeque::with_capacity(RECENT_LIMIT),
            error_count: 0,
            last_error: None,
        }
    }

    /// Folds one event into the view.
    pub fn apply(&mut self, event: &BotEvent) {
        match event {
            BotEvent::TradeUpdate(trade) => {
                self.total_trades += 1;
                push_recent(&mut self.recent_trades, trade.clone());
                self.last_update = trade.timestamp;
            }
            BotEvent::Decision(decision) => {
                push_recent(&mut self.recent_decisions, decision.clone());
                self.last_update = decision.timestamp;
            }
            BotEvent::PortfolioUpdate(portfolio) => {
                self.last_update = portfolio.timestamp;
                self.portfolio = Some(portfolio.clone());
            }
            BotEvent::BalanceUpdate(balance) => {
                self.last_update = balance.timestamp;
                self.balance = Some(balance.clone());
            }
            BotEvent::CycleCompleted(summary) => {
                self.cycles_completed = summary.cycle;
                self.agent = summary.agent.clone();
                self.last_update = summary.timestamp;
            }
            BotEvent::Error { message, timestamp } => {
                self.error_count += 1;
                self.last_error = Some(message.clone());
                self.last_update = *timestamp;
            }
        }
    }
}

fn push_recent<T>(queue: &mut VecDeque<T>, item: T) {
    queue.push_front(item);
    queue.truncate(RECENT_LIMIT);
}

/// Spawns a task folding `events` into a watch channel until shutdown or
/// until every event sender is gone.
#[must_use]
pub fn spawn_status_aggregator(
    mut events: broadcast::Receiver<BotEvent>,
    mut shutdown: Shutdown,
) -> (watch::Receiver<DashboardStatus>, JoinHandle<()>) {
    let (status_tx, status_rx) = watch::channel(DashboardStatus::new(Utc::now()));

    let handle = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                received = events.recv() => received,
                () = shutdown.wait() => break,
            };

            match event {
                Ok(event) => status_tx.send_modify(|status| status.apply(&event)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "status aggregator lagged behind events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::debug!("status aggregator stopped");
    });

    (status_rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use qtrade_core::{CycleSummary, TradeAction};
    use std::collections::BTreeMap;

    fn trade(symbol: &str) -> TradeUpdate {
        TradeUpdate {
            symbol: symbol.to_string(),
            action: TradeAction::Buy,
            price: 10.0,
            quantity: 100,
            client_order_id: format!("id-{symbol}"),
            timestamp: Utc::now(),
        }
    }

    // ==================== Fold Tests ====================

    #[test]
    fn test_recent_trades_are_bounded_newest_first() {
        let mut status = DashboardStatus::new(Utc::now());
        for i in 0..(RECENT_LIMIT + 5) {
            status.apply(&BotEvent::TradeUpdate(trade(&format!("S{i}"))));
        }

        assert_eq!(status.total_trades, (RECENT_LIMIT + 5) as u64);
        assert_eq!(status.recent_trades.len(), RECENT_LIMIT);
        assert_eq!(
            status.recent_trades.front().unwrap().symbol,
            format!("S{}", RECENT_LIMIT + 4)
        );
    }

    #[test]
    fn test_cycle_and_error_events_update_counters() {
        let mut status = DashboardStatus::new(Utc::now());
        let agent = AgentStats {
            num_updates: 4,
            ..AgentStats::default()
        };

        status.apply(&BotEvent::CycleCompleted(CycleSummary {
            cycle: 3,
            processed: 4,
            skipped: 0,
            trades: 1,
            agent: agent.clone(),
            timestamp: Utc::now(),
        }));
        status.apply(&BotEvent::error("boom"));

        assert_eq!(status.cycles_completed, 3);
        assert_eq!(status.agent, agent);
        assert_eq!(status.error_count, 1);
        assert_eq!(status.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_portfolio_replaced_by_latest() {
        let mut status = DashboardStatus::new(Utc::now());
        let mut positions = BTreeMap::new();
        positions.insert("AAPL".to_string(), 100);

        status.apply(&BotEvent::PortfolioUpdate(PortfolioUpdate {
            positions,
            broker_positions: Vec::new(),
            timestamp: Utc::now(),
        }));

        let portfolio = status.portfolio.unwrap();
        assert_eq!(portfolio.positions.get("AAPL"), Some(&100));
    }

    // ==================== Aggregator Tests ====================

    #[tokio::test]
    async fn test_aggregator_publishes_folded_status() {
        let (tx, rx) = broadcast::channel(16);
        let (trigger, shutdown) = qtrade_core::shutdown::channel();
        let (mut status_rx, handle) = spawn_status_aggregator(rx, shutdown);

        tx.send(BotEvent::TradeUpdate(trade("MSFT"))).unwrap();
        status_rx
            .wait_for(|status| status.total_trades == 1)
            .await
            .unwrap();
        assert_eq!(status_rx.borrow().recent_trades[0].symbol, "MSFT");

        trigger.trigger();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_aggregator_stops_when_senders_dropped() {
        let (tx, rx) = broadcast::channel::<BotEvent>(4);
        let (_status_rx, handle) = spawn_status_aggregator(rx, Shutdown::never());

        drop(tx);
        handle.await.unwrap();
    }
}
