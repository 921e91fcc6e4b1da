//! Tabular Q-learning for per-symbol trading decisions.
//!
//! - [`StateDiscretizer`] maps price and position to one of nine states
//! - [`QTable`] stores learned values with a 0.0 default
//! - [`QLearningAgent`] selects actions epsilon-greedily and applies updates
//! - [`reward::compute_reward`] scores an action by the subsequent price move

pub mod policy;
pub mod q_table;
pub mod reward;
pub mod state;

pub use policy::{QLearningAgent, QLearningParams, Selection};
pub use q_table::{QEntry, QTable};
pub use reward::compute_reward;
pub use state::{price_change, MarketState, ParseStateError, PositionState, PriceTrend, StateDiscretizer};
