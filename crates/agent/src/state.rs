//! Discrete market state.
//!
//! A symbol's observation (current price, last price, position) collapses to
//! one of nine labels such as `long_up` or `neutral_stable`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid market state label: {0}")]
pub struct ParseStateError(String);

/// Sign of the held position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PositionState {
    Long,
    Short,
    Neutral,
}

impl PositionState {
    pub const ALL: [Self; 3] = [Self::Long, Self::Short, Self::Neutral];

    #[must_use]
    pub const fn from_position(shares: i64) -> Self {
        if shares > 0 {
            Self::Long
        } else if shares < 0 {
            Self::Short
        } else {
            Self::Neutral
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Long => "long",
            Self::Short => "short",
            Self::Neutral => "neutral",
        }
    }
}

/// Direction of the price since the last observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PriceTrend {
    Up,
    Down,
    Stable,
}

impl PriceTrend {
    pub const ALL: [Self; 3] = [Self::Up, Self::Down, Self::Stable];

    /// Classifies a relative price change against `threshold`.
    #[must_use]
    pub fn from_change(change: f64, threshold: f64) -> Self {
        if change.abs() < threshold || change.is_nan() {
            Self::Stable
        } else if change > 0.0 {
            Self::Up
        } else {
            Self::Down
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Stable => "stable",
        }
    }
}

/// One of the nine discrete states, rendered as `{position}_{trend}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct MarketState {
    pub position: PositionState,
    pub trend: PriceTrend,
}

impl MarketState {
    #[must_use]
    pub const fn new(position: PositionState, trend: PriceTrend) -> Self {
        Self { position, trend }
    }

    /// Every possible state.
    #[must_use]
    pub fn all() -> Vec<Self> {
        PositionState::ALL
            .iter()
            .flat_map(|position| {
                PriceTrend::ALL
                    .iter()
                    .map(move |trend| Self::new(*position, *trend))
            })
            .collect()
    }
}

impl fmt::Display for MarketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.position.as_str(), self.trend.as_str())
    }
}

impl FromStr for MarketState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (position, trend) = s
            .split_once('_')
            .ok_or_else(|| ParseStateError(s.to_string()))?;

        let position = PositionState::ALL
            .into_iter()
            .find(|p| p.as_str() == position)
            .ok_or_else(|| ParseStateError(s.to_string()))?;
        let trend = PriceTrend::ALL
            .into_iter()
            .find(|t| t.as_str() == trend)
            .ok_or_else(|| ParseStateError(s.to_string()))?;

        Ok(Self::new(position, trend))
    }
}

impl From<MarketState> for String {
    fn from(state: MarketState) -> Self {
        state.to_string()
    }
}

impl TryFrom<String> for MarketState {
    type Error = ParseStateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Relative change from `last_price` to `current_price`.
///
/// Zero when there is no usable previous price, so a first observation is
/// its own baseline.
#[must_use]
pub fn price_change(current_price: f64, last_price: Option<f64>) -> f64 {
    match last_price {
        Some(last) if last > 0.0 => (current_price - last) / last,
        _ => 0.0,
    }
}

/// Maps raw observations to a [`MarketState`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateDiscretizer {
    min_price_change: f64,
}

impl Default for StateDiscretizer {
    fn default() -> Self {
        Self::new(0.001)
    }
}

impl StateDiscretizer {
    #[must_use]
    pub const fn new(min_price_change: f64) -> Self {
        Self { min_price_change }
    }

    #[must_use]
    pub const fn min_price_change(&self) -> f64 {
        self.min_price_change
    }

    /// Discretizes one symbol's observation. Pure and deterministic.
    #[must_use]
    pub fn discretize(&self, current_price: f64, position: i64, last_price: Option<f64>) -> MarketState {
        let change = price_change(current_price, last_price);
        MarketState::new(
            PositionState::from_position(position),
            PriceTrend::from_change(change, self.min_price_change),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    // ==================== Discretizer Tests ====================

    #[test]
    fn test_price_up_one_percent() {
        let discretizer = StateDiscretizer::default();
        let state = discretizer.discretize(101.0, 0, Some(100.0));

        assert_eq!(state.trend, PriceTrend::Up);
        assert_eq!(state.to_string(), "neutral_up");
    }

    #[test]
    fn test_price_down_and_short() {
        let discretizer = StateDiscretizer::default();
        let state = discretizer.discretize(99.0, -100, Some(100.0));
        assert_eq!(state.to_string(), "short_down");
    }

    #[test]
    fn test_small_move_is_stable() {
        let discretizer = StateDiscretizer::default();
        // 0.05% move is under the 0.1% threshold.
        let state = discretizer.discretize(100.05, 100, Some(100.0));
        assert_eq!(state.to_string(), "long_stable");
    }

    #[test]
    fn test_threshold_boundary_is_not_stable() {
        let discretizer = StateDiscretizer::new(0.01);
        assert_eq!(discretizer.discretize(102.0, 0, Some(100.0)).trend, PriceTrend::Up);
        assert_eq!(discretizer.discretize(100.5, 0, Some(100.0)).trend, PriceTrend::Stable);
    }

    #[test]
    fn test_first_observation_is_stable() {
        let discretizer = StateDiscretizer::default();
        assert_eq!(discretizer.discretize(250.0, 0, None).trend, PriceTrend::Stable);
        assert_eq!(discretizer.discretize(250.0, 0, Some(0.0)).trend, PriceTrend::Stable);
    }

    #[test]
    fn test_discretize_is_deterministic() {
        let discretizer = StateDiscretizer::default();
        let first = discretizer.discretize(123.4, 5, Some(120.0));
        for _ in 0..10 {
            assert_eq!(discretizer.discretize(123.4, 5, Some(120.0)), first);
        }
    }

    #[test]
    fn test_all_inputs_map_into_nine_labels() {
        let discretizer = StateDiscretizer::default();
        let mut seen = HashSet::new();

        for position in [-100, 0, 100] {
            for current in [90.0, 100.0, 100.01, 110.0] {
                seen.insert(discretizer.discretize(current, position, Some(100.0)).to_string());
            }
        }

        assert_eq!(seen.len(), 9);
        let labels: HashSet<_> = MarketState::all().iter().map(ToString::to_string).collect();
        assert!(seen.is_subset(&labels));
    }

    // ==================== Label Tests ====================

    #[test]
    fn test_exactly_nine_distinct_states() {
        let states: HashSet<_> = MarketState::all().into_iter().collect();
        assert_eq!(states.len(), 9);
    }

    #[test]
    fn test_label_round_trip() {
        for state in MarketState::all() {
            assert_eq!(state.to_string().parse::<MarketState>(), Ok(state));
        }
    }

    #[test]
    fn test_invalid_labels_rejected() {
        assert!("long".parse::<MarketState>().is_err());
        assert!("flat_up".parse::<MarketState>().is_err());
        assert!("long_sideways".parse::<MarketState>().is_err());
    }
}
