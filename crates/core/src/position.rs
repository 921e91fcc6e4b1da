use crate::broker::OrderSide;
use std::collections::BTreeMap;

/// In-memory signed share count per symbol.
///
/// Positive is long, negative is short, absent is flat. Updated
/// optimistically when an order is accepted, not reconciled against fills.
#[derive(Debug, Clone, Default)]
pub struct PositionLedger {
    positions: BTreeMap<String, i64>,
}

impl PositionLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies an accepted order and returns the new share count.
    pub fn apply(&mut self, symbol: &str, side: OrderSide, qty: i64) -> i64 {
        let entry = self.positions.entry(symbol.to_string()).or_insert(0);
        *entry += side.sign() * qty;
        let updated = *entry;

        if updated == 0 {
            self.positions.remove(symbol);
        }

        updated
    }

    /// Share count for `symbol`, zero when flat.
    #[must_use]
    pub fn get(&self, symbol: &str) -> i64 {
        self.positions.get(symbol).copied().unwrap_or(0)
    }

    #[must_use]
    pub const fn all_positions(&self) -> &BTreeMap<String, i64> {
        &self.positions
    }

    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, i64> {
        self.positions.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_symbol_is_flat() {
        let ledger = PositionLedger::new();
        assert_eq!(ledger.get("AAPL"), 0);
    }

    #[test]
    fn test_buy_then_sell_goes_long_then_flat() {
        let mut ledger = PositionLedger::new();

        assert_eq!(ledger.apply("AAPL", OrderSide::Buy, 100), 100);
        assert_eq!(ledger.get("AAPL"), 100);

        assert_eq!(ledger.apply("AAPL", OrderSide::Sell, 100), 0);
        assert_eq!(ledger.get("AAPL"), 0);
        assert!(ledger.all_positions().is_empty());
    }

    #[test]
    fn test_sell_from_flat_goes_short() {
        let mut ledger = PositionLedger::new();

        assert_eq!(ledger.apply("MSFT", OrderSide::Sell, 100), -100);
        assert_eq!(ledger.apply("MSFT", OrderSide::Sell, 100), -200);
        assert_eq!(ledger.get("MSFT"), -200);
    }

    #[test]
    fn test_snapshot_is_ordered_by_symbol() {
        let mut ledger = PositionLedger::new();
        ledger.apply("MSFT", OrderSide::Buy, 10);
        ledger.apply("AAPL", OrderSide::Sell, 5);

        let symbols: Vec<_> = ledger.snapshot().into_keys().collect();
        assert_eq!(symbols, vec!["AAPL", "MSFT"]);
    }
}
