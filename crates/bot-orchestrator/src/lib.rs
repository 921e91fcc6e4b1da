//! Runtime orchestration for the Q-learning trader.
//!
//! - [`TradingCycle`] runs observe, decide, act, re-observe and learn for each symbol
//! - [`BalancePoller`] emits account balance snapshots on a fixed interval
//! - [`spawn_status_aggregator`] folds the event stream into a [`DashboardStatus`]
//!
//! All three communicate only through a `broadcast` channel of
//! [`qtrade_core::BotEvent`]s and stop on the shared shutdown signal.

pub mod balance_tracker;
pub mod status;
pub mod trading_cycle;

pub use balance_tracker::{BalancePoller, BalanceTracker};
pub use status::{spawn_status_aggregator, DashboardStatus, RECENT_LIMIT};
pub use trading_cycle::{load_agent, SymbolOutcome, TradingCycle};

/// Capacity of the event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 1000;
