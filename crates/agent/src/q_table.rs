//! Q-value storage.

use crate::state::MarketState;
use anyhow::{Context, Result};
use qtrade_core::TradeAction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// One stored Q-value, the unit of the JSON snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QEntry {
    pub state: MarketState,
    pub action: TradeAction,
    pub value: f64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    entries: Vec<QEntry>,
}

/// Mapping from `(state, action)` to value.
///
/// Lookups of unseen pairs read 0.0 without inserting. Only actions that were
/// actually updated count as stored, which is what greedy selection and the
/// next-state maximum look at.
#[derive(Debug, Clone, Default)]
pub struct QTable {
    values: HashMap<MarketState, BTreeMap<TradeAction, f64>>,
}

impl QTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored value, or 0.0 for an unseen pair.
    #[must_use]
    pub fn get(&self, state: MarketState, action: TradeAction) -> f64 {
        self.values
            .get(&state)
            .and_then(|actions| actions.get(&action))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn set(&mut self, state: MarketState, action: TradeAction, value: f64) {
        self.values.entry(state).or_default().insert(action, value);
    }

    /// True when at least one action has been stored for `state`.
    #[must_use]
    pub fn has_state(&self, state: MarketState) -> bool {
        self.values.get(&state).is_some_and(|actions| !actions.is_empty())
    }

    /// Stored action with the highest value.
    ///
    /// Ties go to the first action in buy, sell, hold order. `None` if
    /// nothing is stored for `state`.
    #[must_use]
    pub fn best_action(&self, state: MarketState) -> Option<(TradeAction, f64)> {
        let actions = self.values.get(&state)?;
        let mut best: Option<(TradeAction, f64)> = None;

        for (action, value) in actions {
            match best {
                Some((_, best_value)) if *value <= best_value => {}
                _ => best = Some((*action, *value)),
            }
        }

        best
    }

    /// Highest stored value for `state`, 0.0 when nothing is stored.
    #[must_use]
    pub fn max_value(&self, state: MarketState) -> f64 {
        self.best_action(state).map_or(0.0, |(_, value)| value)
    }

    /// Number of states with at least one stored action.
    #[must_use]
    pub fn state_count(&self) -> usize {
        self.values.values().filter(|actions| !actions.is_empty()).count()
    }

    /// Number of stored `(state, action)` pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.values().map(BTreeMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All stored values, ordered by state then action.
    #[must_use]
    pub fn entries(&self) -> Vec<QEntry> {
        let mut entries: Vec<QEntry> = self
            .values
            .iter()
            .flat_map(|(state, actions)| {
                actions.iter().map(|(action, value)| QEntry {
                    state: *state,
                    action: *action,
                    value: *value,
                })
            })
            .collect();
        entries.sort_by(|a, b| (a.state, a.action).cmp(&(b.state, b.action)));
        entries
    }

    #[must_use]
    pub fn from_entries(entries: impl IntoIterator<Item = QEntry>) -> Self {
        let mut table = Self::new();
        for entry in entries {
            table.set(entry.state, entry.action, entry.value);
        }
        table
    }

    /// Writes the table as JSON.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let snapshot = Snapshot {
            entries: self.entries(),
        };
        let json = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write Q-table to {}", path.display()))?;

        tracing::info!(path = %path.display(), entries = snapshot.entries.len(), "Q-table saved");
        Ok(())
    }

    /// Reads a table written by [`QTable::save`].
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read Q-table from {}", path.display()))?;
        let snapshot: Snapshot = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse Q-table in {}", path.display()))?;

        tracing::info!(path = %path.display(), entries = snapshot.entries.len(), "Q-table loaded");
        Ok(Self::from_entries(snapshot.entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{PositionState, PriceTrend};

    fn state(label: &str) -> MarketState {
        label.parse().unwrap()
    }

    // ==================== Lookup Tests ====================

    #[test]
    fn test_unseen_pair_reads_zero_without_inserting() {
        let table = QTable::new();

        assert_eq!(table.get(state("long_up"), TradeAction::Buy), 0.0);
        assert!(!table.has_state(state("long_up")));
        assert!(table.is_empty());
    }

    #[test]
    fn test_set_and_get() {
        let mut table = QTable::new();
        table.set(state("short_down"), TradeAction::Sell, 2.5);

        assert_eq!(table.get(state("short_down"), TradeAction::Sell), 2.5);
        assert_eq!(table.get(state("short_down"), TradeAction::Buy), 0.0);
        assert_eq!(table.len(), 1);
        assert_eq!(table.state_count(), 1);
    }

    // ==================== Best Action Tests ====================

    #[test]
    fn test_best_action_picks_maximum() {
        let mut table = QTable::new();
        let s = state("neutral_up");
        table.set(s, TradeAction::Buy, 0.4);
        table.set(s, TradeAction::Sell, 1.2);
        table.set(s, TradeAction::Hold, -0.3);

        assert_eq!(table.best_action(s), Some((TradeAction::Sell, 1.2)));
        assert_eq!(table.max_value(s), 1.2);
    }

    #[test]
    fn test_best_action_ties_go_to_first_in_order() {
        let mut table = QTable::new();
        let s = state("neutral_stable");
        table.set(s, TradeAction::Hold, 1.0);
        table.set(s, TradeAction::Sell, 1.0);

        assert_eq!(table.best_action(s), Some((TradeAction::Sell, 1.0)));

        table.set(s, TradeAction::Buy, 1.0);
        assert_eq!(table.best_action(s), Some((TradeAction::Buy, 1.0)));
    }

    #[test]
    fn test_best_action_considers_only_stored_actions() {
        let mut table = QTable::new();
        let s = MarketState::new(PositionState::Long, PriceTrend::Down);
        table.set(s, TradeAction::Buy, -5.0);

        assert_eq!(table.best_action(s), Some((TradeAction::Buy, -5.0)));
        assert_eq!(table.max_value(s), -5.0);
    }

    #[test]
    fn test_max_value_of_unseen_state_is_zero() {
        let table = QTable::new();
        assert_eq!(table.best_action(state("short_up")), None);
        assert_eq!(table.max_value(state("short_up")), 0.0);
    }

    // ==================== Snapshot Tests ====================

    #[test]
    fn test_save_and_load_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("q_table.json");

        let mut table = QTable::new();
        table.set(state("long_up"), TradeAction::Hold, 0.75);
        table.set(state("short_down"), TradeAction::Buy, -1.5);
        table.save(&path).unwrap();

        let loaded = QTable::load(&path).unwrap();
        assert_eq!(loaded.entries(), table.entries());

        let json = std::fs::read_to_string(&path).unwrap();
        assert!(json.contains("\"long_up\""));
        assert!(json.contains("\"hold\""));
    }

    #[test]
    fn test_load_rejects_unknown_state_label() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(
            &path,
            r#"{"entries":[{"state":"sideways","action":"buy","value":1.0}]}"#,
        )
        .unwrap();

        assert!(QTable::load(&path).is_err());
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(QTable::load(&dir.path().join("missing.json")).is_err());
    }
}
