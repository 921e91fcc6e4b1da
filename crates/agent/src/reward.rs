//! Reward for a single decision.
//!
//! The reward is the percentage price move over the settle window, signed by
//! whether the action anticipated it:
//! reward = ±(price_after - price_before) / price_before × 100

use qtrade_core::TradeAction;

/// Percentage move from `price_before` to `price_after`, times 100.
///
/// Zero when `price_before` is not a positive price.
#[must_use]
pub fn percent_move(price_before: f64, price_after: f64) -> f64 {
    if price_before <= 0.0 {
        return 0.0;
    }
    (price_after - price_before) / price_before * 100.0
}

/// Computes the reward of `action`.
///
/// # Example
/// ```
/// use qtrade_agent::reward::compute_reward;
/// use qtrade_core::TradeAction;
///
/// assert!((compute_reward(TradeAction::Buy, 100.0, 105.0) - 5.0).abs() < 1e-9);
/// assert!((compute_reward(TradeAction::Sell, 100.0, 105.0) + 5.0).abs() < 1e-9);
/// assert_eq!(compute_reward(TradeAction::Hold, 100.0, 105.0), 0.0);
/// ```
#[must_use]
pub fn compute_reward(action: TradeAction, price_before: f64, price_after: f64) -> f64 {
    match action {
        TradeAction::Hold => 0.0,
        TradeAction::Buy => percent_move(price_before, price_after),
        TradeAction::Sell => -percent_move(price_before, price_after),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_buy_rewarded_for_rise() {
        assert!((compute_reward(TradeAction::Buy, 100.0, 105.0) - 5.0).abs() < EPS);
    }

    #[test]
    fn test_sell_penalised_for_rise() {
        assert!((compute_reward(TradeAction::Sell, 100.0, 105.0) + 5.0).abs() < EPS);
    }

    #[test]
    fn test_sell_rewarded_for_fall() {
        assert!((compute_reward(TradeAction::Sell, 200.0, 198.0) - 1.0).abs() < EPS);
    }

    #[test]
    fn test_hold_is_always_zero() {
        for (before, after) in [(100.0, 105.0), (100.0, 50.0), (0.0, 10.0)] {
            assert_eq!(compute_reward(TradeAction::Hold, before, after), 0.0);
        }
    }

    #[test]
    fn test_non_positive_base_price_gives_zero() {
        assert_eq!(compute_reward(TradeAction::Buy, 0.0, 10.0), 0.0);
        assert_eq!(compute_reward(TradeAction::Sell, -1.0, 10.0), 0.0);
    }
}
