//! Per-pair profit threshold table: a default plus override entries,
//! loaded from configuration (`PROFIT_THRESHOLDS` /
//! `MIN_ARBITRAGE_PROFIT_USD`). A single global floor generalized to a
//! map with per-pair overrides.

use std::collections::HashMap;

use alloy::primitives::{Address, U256};

/// Net-profit threshold, in the borrow token's smallest unit, keyed by
/// the unordered pair `(borrow_token, end_token)`.
#[derive(Debug, Clone)]
pub struct ThresholdTable {
    default_threshold: i128,
    overrides: HashMap<(Address, Address), i128>,
}

impl ThresholdTable {
    pub fn new(default_threshold: i128) -> Self {
        Self {
            default_threshold,
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, a: Address, b: Address, threshold: i128) -> Self {
        self.overrides.insert(Self::key(a, b), threshold);
        self
    }

    fn key(a: Address, b: Address) -> (Address, Address) {
        if a < b {
            (a, b)
        } else {
            (b, a)
        }
    }

    /// Threshold for a (borrow_token, end_token) pair, falling back to
    /// the default. Always `Some` unless the table was constructed with
    /// no default and no matching override, which this API forbids.
    pub fn for_pair(&self, borrow_token: Address, end_token: Address) -> Option<i128> {
        Some(
            *self
                .overrides
                .get(&Self::key(borrow_token, end_token))
                .unwrap_or(&self.default_threshold),
        )
    }

    /// Convert a USD-denominated minimum into an approximate token-unit
    /// threshold given a scaled USD price (1e18-scaled, as produced by
    /// the Oracle Validator). Used when seeding defaults from
    /// `MIN_ARBITRAGE_PROFIT_USD`.
    pub fn usd_to_token_units(min_profit_usd: f64, usd_price_scaled_1e18: U256, decimals: u8) -> i128 {
        if usd_price_scaled_1e18.is_zero() {
            return i128::MAX;
        }
        let price_f64 = usd_price_scaled_1e18.to::<u128>() as f64 / 1e18;
        if price_f64 <= 0.0 {
            return i128::MAX;
        }
        let tokens_needed = min_profit_usd / price_f64;
        (tokens_needed * 10f64.powi(decimals as i32)) as i128
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_default() {
        let table = ThresholdTable::new(100);
        let a = Address::from([1u8; 20]);
        let b = Address::from([2u8; 20]);
        assert_eq!(table.for_pair(a, b), Some(100));
    }

    #[test]
    fn override_is_order_independent() {
        let a = Address::from([1u8; 20]);
        let b = Address::from([2u8; 20]);
        let table = ThresholdTable::new(100).with_override(a, b, 500);
        assert_eq!(table.for_pair(a, b), Some(500));
        assert_eq!(table.for_pair(b, a), Some(500));
    }
}
