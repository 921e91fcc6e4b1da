//! Epsilon-greedy tabular Q-learning.

use crate::q_table::QTable;
use crate::state::MarketState;
use qtrade_core::{AgentConfig, AgentStats, TradeAction};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Learning hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QLearningParams {
    /// Probability of a uniformly random action.
    pub epsilon: f64,
    /// Alpha.
    pub learning_rate: f64,
    /// Gamma.
    pub discount_factor: f64,
}

impl Default for QLearningParams {
    fn default() -> Self {
        Self {
            epsilon: 0.3,
            learning_rate: 0.1,
            discount_factor: 0.95,
        }
    }
}

impl From<&AgentConfig> for QLearningParams {
    fn from(config: &AgentConfig) -> Self {
        Self {
            epsilon: config.epsilon,
            learning_rate: config.learning_rate,
            discount_factor: config.discount_factor,
        }
    }
}

/// How an action was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Random draw under epsilon.
    Explore,
    /// Best stored action.
    Exploit,
    /// Random because nothing is stored for the state yet.
    ColdStart,
}

/// Tabular Q-learning agent.
#[derive(Debug)]
pub struct QLearningAgent {
    params: QLearningParams,
    table: QTable,
    rng: StdRng,
    stats: AgentStats,
}

impl QLearningAgent {
    /// Creates an agent with an empty table; entropy-seeded unless `seed` is set.
    #[must_use]
    pub fn new(params: QLearningParams, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            params,
            table: QTable::new(),
            rng,
            stats: AgentStats::default(),
        }
    }

    #[must_use]
    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(QLearningParams::from(config), config.seed)
    }

    /// Replaces the table, e.g. with a loaded snapshot.
    #[must_use]
    pub fn with_table(mut self, table: QTable) -> Self {
        self.table = table;
        self
    }

    #[must_use]
    pub const fn params(&self) -> &QLearningParams {
        &self.params
    }

    #[must_use]
    pub const fn table(&self) -> &QTable {
        &self.table
    }

    /// Picks an action for `state`.
    pub fn select_action(&mut self, state: MarketState) -> TradeAction {
        self.choose(state).0
    }

    /// Picks an action and reports how it was chosen.
    ///
    /// With probability epsilon the action is uniform over buy/sell/hold.
    /// Otherwise it is the best stored action, or uniform when nothing is
    /// stored for `state`.
    pub fn choose(&mut self, state: MarketState) -> (TradeAction, Selection) {
        self.stats.total_actions += 1;

        if self.rng.gen::<f64>() < self.params.epsilon {
            self.stats.exploration_actions += 1;
            return (self.random_action(), Selection::Explore);
        }

        match self.table.best_action(state) {
            Some((action, _)) => {
                self.stats.exploitation_actions += 1;
                (action, Selection::Exploit)
            }
            None => {
                self.stats.cold_start_actions += 1;
                (self.random_action(), Selection::ColdStart)
            }
        }
    }

    /// One-step Q-learning update; returns the new value.
    ///
    /// `Q[s,a] <- (1 - alpha) * Q[s,a] + alpha * (reward + gamma * max Q[s',*])`
    pub fn update(
        &mut self,
        state: MarketState,
        action: TradeAction,
        reward: f64,
        next_state: MarketState,
    ) -> f64 {
        let old_value = self.table.get(state, action);
        let next_max = self.table.max_value(next_state);
        let alpha = self.params.learning_rate;
        let new_value =
            (1.0 - alpha) * old_value + alpha * (reward + self.params.discount_factor * next_max);

        self.table.set(state, action, new_value);
        self.stats.num_updates += 1;
        self.stats.cumulative_reward += reward;

        tracing::debug!(
            state = %state,
            action = %action,
            reward,
            old_value,
            new_value,
            "Q-value updated"
        );

        new_value
    }

    #[must_use]
    pub fn stats(&self) -> AgentStats {
        AgentStats {
            states_visited: self.table.state_count(),
            q_entries: self.table.len(),
            ..self.stats.clone()
        }
    }

    fn random_action(&mut self) -> TradeAction {
        TradeAction::ALL[self.rng.gen_range(0..TradeAction::ALL.len())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(label: &str) -> MarketState {
        label.parse().unwrap()
    }

    fn greedy(seed: u64) -> QLearningAgent {
        QLearningAgent::new(
            QLearningParams {
                epsilon: 0.0,
                ..QLearningParams::default()
            },
            Some(seed),
        )
    }

    // ==================== Update Tests ====================

    #[test]
    fn test_first_update_is_alpha_times_reward() {
        let mut agent = greedy(1);
        let value = agent.update(state("neutral_stable"), TradeAction::Buy, 10.0, state("long_up"));

        assert!((value - 1.0).abs() < 1e-12);
        assert!((agent.table().get(state("neutral_stable"), TradeAction::Buy) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_update_discounts_next_state_maximum() {
        let mut agent = greedy(1);
        let next = state("long_up");
        agent.update(next, TradeAction::Hold, 20.0, next);
        // Q[next, hold] = 0.1 * (20 + 0.95 * 0) = 2.0

        let value = agent.update(state("neutral_up"), TradeAction::Buy, 0.0, next);
        // 0.1 * (0 + 0.95 * 2.0)
        assert!((value - 0.19).abs() < 1e-12);
    }

    #[test]
    fn test_repeated_updates_converge_towards_reward() {
        let mut agent = greedy(1);
        let s = state("short_down");
        let terminal = state("neutral_stable");

        let mut value = 0.0;
        for _ in 0..200 {
            value = agent.update(s, TradeAction::Sell, 3.0, terminal);
        }
        assert!((value - 3.0).abs() < 1e-6);
    }

    // ==================== Selection Tests ====================

    #[test]
    fn test_greedy_picks_best_stored_action() {
        let mut agent = greedy(7);
        let s = state("long_stable");
        agent.update(s, TradeAction::Sell, 5.0, s);
        agent.update(s, TradeAction::Buy, 1.0, s);

        for _ in 0..20 {
            assert_eq!(agent.choose(s), (TradeAction::Sell, Selection::Exploit));
        }
    }

    #[test]
    fn test_greedy_tie_break_is_buy_sell_hold() {
        let table = QTable::from_entries([
            crate::q_table::QEntry {
                state: state("neutral_up"),
                action: TradeAction::Hold,
                value: 1.0,
            },
            crate::q_table::QEntry {
                state: state("neutral_up"),
                action: TradeAction::Buy,
                value: 1.0,
            },
        ]);
        let mut agent = greedy(3).with_table(table);

        assert_eq!(agent.select_action(state("neutral_up")), TradeAction::Buy);
    }

    #[test]
    fn test_cold_start_is_random_over_all_actions() {
        let mut agent = greedy(11);
        let s = state("short_up");

        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            let (action, selection) = agent.choose(s);
            assert_eq!(selection, Selection::ColdStart);
            seen.insert(action);
        }

        assert_eq!(seen.len(), 3);
        assert_eq!(agent.stats().cold_start_actions, 200);
    }

    #[test]
    fn test_full_exploration_ignores_table() {
        let mut agent = QLearningAgent::new(
            QLearningParams {
                epsilon: 1.0,
                ..QLearningParams::default()
            },
            Some(5),
        );
        let s = state("long_up");
        agent.update(s, TradeAction::Hold, 100.0, s);

        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            let (action, selection) = agent.choose(s);
            assert_eq!(selection, Selection::Explore);
            seen.insert(action);
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_exploration_rate_roughly_matches_epsilon() {
        let mut agent = QLearningAgent::new(QLearningParams::default(), Some(2024));
        let s = state("neutral_stable");
        agent.update(s, TradeAction::Hold, 1.0, s);

        for _ in 0..10_000 {
            agent.select_action(s);
        }

        let stats = agent.stats();
        let rate = stats.exploration_actions as f64 / stats.total_actions as f64;
        assert!((0.27..0.33).contains(&rate), "exploration rate {rate}");
        assert_eq!(
            stats.exploration_actions + stats.exploitation_actions,
            stats.total_actions
        );
    }

    #[test]
    fn test_same_seed_same_choices() {
        let mut a = QLearningAgent::new(QLearningParams::default(), Some(99));
        let mut b = QLearningAgent::new(QLearningParams::default(), Some(99));

        for label in ["long_up", "short_down", "neutral_stable", "long_up"] {
            assert_eq!(a.select_action(state(label)), b.select_action(state(label)));
        }
    }

    // ==================== Stats Tests ====================

    #[test]
    fn test_stats_track_updates_and_table_size() {
        let mut agent = greedy(1);
        agent.update(state("long_up"), TradeAction::Buy, 2.0, state("long_up"));
        agent.update(state("long_up"), TradeAction::Sell, -1.0, state("long_up"));
        agent.update(state("short_up"), TradeAction::Hold, 0.0, state("long_up"));

        let stats = agent.stats();
        assert_eq!(stats.num_updates, 3);
        assert!((stats.cumulative_reward - 1.0).abs() < 1e-12);
        assert_eq!(stats.states_visited, 2);
        assert_eq!(stats.q_entries, 3);
    }
}
