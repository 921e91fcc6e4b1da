//! Periodic account balance snapshots with hourly and daily change.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use qtrade_alpaca::{EndpointClass, RequestExecutor};
use qtrade_core::{Account, BalanceUpdate, BotEvent, BrokerApi, Shutdown};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

/// Equity recorded at the start of a tracking window.
#[derive(Debug, Clone, Copy)]
struct Baseline {
    started_at: DateTime<Utc>,
    equity: Decimal,
}

impl Baseline {
    /// Restarts the window once it is older than `window`.
    fn roll(
        slot: &mut Option<Self>,
        now: DateTime<Utc>,
        equity: Decimal,
        window: ChronoDuration,
    ) -> Self {
        match *slot {
            Some(baseline) if now - baseline.started_at <= window => baseline,
            _ => {
                let fresh = Self {
                    started_at: now,
                    equity,
                };
                *slot = Some(fresh);
                fresh
            }
        }
    }

    fn change(&self, equity: Decimal) -> (Decimal, f64) {
        let change = equity - self.equity;
        let pct = if self.equity.is_zero() {
            0.0
        } else {
            (change / self.equity * Decimal::ONE_HUNDRED)
                .to_f64()
                .unwrap_or(0.0)
        };
        (change, pct)
    }
}

/// Folds account snapshots into [`BalanceUpdate`]s.
///
/// The first observation starts both windows. A window restarts at the first
/// observation taken more than an hour (or a day) after it began.
#[derive(Debug, Default)]
pub struct BalanceTracker {
    hour: Option<Baseline>,
    day: Option<Baseline>,
}

impl BalanceTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, account: &Account, now: DateTime<Utc>) -> BalanceUpdate {
        let equity = account.portfolio_value;
        let hour = Baseline::roll(&mut self.hour, now, equity, ChronoDuration::hours(1));
        let day = Baseline::roll(&mut self.day, now, equity, ChronoDuration::days(1));

        let (hourly_change, hourly_change_pct) = hour.change(equity);
        let (daily_change, daily_change_pct) = day.change(equity);

        BalanceUpdate {
            timestamp: now,
            total_equity: equity,
            cash_balance: account.cash,
            buying_power: account.buying_power,
            hourly_change,
            hourly_change_pct,
            daily_change,
            daily_change_pct,
            account_status: account.status.clone(),
        }
    }
}

/// Polls the account on a fixed interval and broadcasts balance updates.
pub struct BalancePoller {
    broker: Arc<dyn BrokerApi>,
    executor: Arc<RequestExecutor>,
    interval: Duration,
    event_tx: broadcast::Sender<BotEvent>,
    shutdown: Shutdown,
    tracker: BalanceTracker,
}

impl BalancePoller {
    #[must_use]
    pub fn new(
        broker: Arc<dyn BrokerApi>,
        executor: Arc<RequestExecutor>,
        interval: Duration,
        event_tx: broadcast::Sender<BotEvent>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            broker,
            executor,
            interval,
            event_tx,
            shutdown,
            tracker: BalanceTracker::new(),
        }
    }

    /// Fetches the account once and emits an update; `None` if unavailable.
    pub async fn poll_once(&mut self) -> Option<BalanceUpdate> {
        let broker = self.broker.as_ref();
        let result = self
            .executor
            .execute(EndpointClass::Account, "get_account", move || broker.get_account())
            .await;

        let account = match result {
            Ok(Some(account)) => account,
            Ok(None) => {
                tracing::warn!("account snapshot not permitted");
                return None;
            }
            Err(e) => {
                if !e.is_cancelled() {
                    tracing::error!(error = %e, "error tracking balance");
                }
                return None;
            }
        };

        let update = self.tracker.observe(&account, Utc::now());
        tracing::debug!(
            equity = %update.total_equity,
            hourly_change_pct = update.hourly_change_pct,
            daily_change_pct = update.daily_change_pct,
            "balance updated"
        );
        let _ = self.event_tx.send(BotEvent::BalanceUpdate(update.clone()));
        Some(update)
    }

    /// Polls until shutdown.
    pub async fn run(mut self) {
        let mut shutdown = self.shutdown.clone();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval_secs = self.interval.as_secs(), "balance tracking started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = shutdown.wait() => break,
            }
            if shutdown.is_triggered() {
                break;
            }
            self.poll_once().await;
        }
        tracing::info!("balance tracking stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use qtrade_alpaca::{PaperBroker, PaperBrokerConfig, RateLimiters};
    use qtrade_core::RetryConfig;
    use rust_decimal_macros::dec;

    fn account(equity: Decimal) -> Account {
        Account {
            id: "acct".to_string(),
            status: "ACTIVE".to_string(),
            cash: dec!(1000),
            portfolio_value: equity,
            buying_power: dec!(2000),
            equity,
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    // ==================== Tracker Tests ====================

    #[test]
    fn test_first_observation_has_zero_change() {
        let mut tracker = BalanceTracker::new();
        let update = tracker.observe(&account(dec!(100000)), at(0));

        assert_eq!(update.total_equity, dec!(100000));
        assert_eq!(update.cash_balance, dec!(1000));
        assert_eq!(update.buying_power, dec!(2000));
        assert_eq!(update.hourly_change, Decimal::ZERO);
        assert_eq!(update.daily_change, Decimal::ZERO);
        assert_eq!(update.hourly_change_pct, 0.0);
        assert_eq!(update.account_status, "ACTIVE");
    }

    #[test]
    fn test_change_measured_against_window_start() {
        let mut tracker = BalanceTracker::new();
        tracker.observe(&account(dec!(100000)), at(0));
        let update = tracker.observe(&account(dec!(101000)), at(600));

        assert_eq!(update.hourly_change, dec!(1000));
        assert!((update.hourly_change_pct - 1.0).abs() < 1e-9);
        assert_eq!(update.daily_change, dec!(1000));
    }

    #[test]
    fn test_hour_window_restarts_after_an_hour() {
        let mut tracker = BalanceTracker::new();
        tracker.observe(&account(dec!(100000)), at(0));
        tracker.observe(&account(dec!(100500)), at(3600));

        let rolled = tracker.observe(&account(dec!(102000)), at(3601));
        assert_eq!(rolled.hourly_change, Decimal::ZERO);
        assert_eq!(rolled.daily_change, dec!(2000));

        let later = tracker.observe(&account(dec!(99960)), at(4000));
        assert_eq!(later.hourly_change, dec!(-2040));
        assert!((later.hourly_change_pct + 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_day_window_restarts_after_a_day() {
        let mut tracker = BalanceTracker::new();
        tracker.observe(&account(dec!(50000)), at(0));

        let next_day = tracker.observe(&account(dec!(55000)), at(86_401));
        assert_eq!(next_day.daily_change, Decimal::ZERO);
        assert_eq!(next_day.hourly_change, Decimal::ZERO);
    }

    #[test]
    fn test_zero_starting_equity_gives_zero_percent() {
        let mut tracker = BalanceTracker::new();
        tracker.observe(&account(Decimal::ZERO), at(0));
        let update = tracker.observe(&account(dec!(10)), at(60));

        assert_eq!(update.hourly_change, dec!(10));
        assert_eq!(update.hourly_change_pct, 0.0);
    }

    // ==================== Poller Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_poll_once_broadcasts_balance() {
        let broker: Arc<dyn BrokerApi> = Arc::new(PaperBroker::new(PaperBrokerConfig::frozen()));
        let executor = Arc::new(RequestExecutor::new(
            Arc::new(RateLimiters::default()),
            RetryConfig::default(),
            Shutdown::never(),
        ));
        let (tx, mut rx) = broadcast::channel(8);
        let mut poller =
            BalancePoller::new(broker, executor, Duration::from_secs(10), tx, Shutdown::never());

        let update = poller.poll_once().await.unwrap();
        assert_eq!(update.total_equity, PaperBrokerConfig::frozen().starting_cash);

        match rx.recv().await.unwrap() {
            BotEvent::BalanceUpdate(event) => assert_eq!(event.total_equity, update.total_equity),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let broker: Arc<dyn BrokerApi> = Arc::new(PaperBroker::new(PaperBrokerConfig::frozen()));
        let executor = Arc::new(RequestExecutor::new(
            Arc::new(RateLimiters::default()),
            RetryConfig::default(),
            Shutdown::never(),
        ));
        let (tx, mut rx) = broadcast::channel(16);
        let (trigger, shutdown) = qtrade_core::shutdown::channel();

        let handle = tokio::spawn(
            BalancePoller::new(broker, executor, Duration::from_secs(10), tx, shutdown).run(),
        );

        tokio::time::sleep(Duration::from_secs(25)).await;
        trigger.trigger();
        handle.await.unwrap();

        let mut updates = 0;
        while let Ok(event) = rx.try_recv() {
            assert!(matches!(event, BotEvent::BalanceUpdate(_)));
            updates += 1;
        }
        // Ticks at 0s, 10s and 20s.
        assert_eq!(updates, 3);
    }
}
