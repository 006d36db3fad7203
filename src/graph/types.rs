//! Pool/edge data model for the liquidity graph.

use alloy::primitives::{Address, U256};

use crate::dex::Dex;

/// A directed swap edge: token_from -> token_to through `pool_address`.
#[derive(Debug, Clone)]
pub struct EdgeData {
    pub pool_address: Address,
    pub dex: Dex,
    /// Effective price after fees, in token_to per token_from.
    pub price: f64,
    /// Fee in hundredths of a bip (1e-6).
    pub fee: u32,
    /// -ln(price), the edge weight consumed by the path finder's
    /// negative-cycle search.
    pub weight: f64,
    /// Normalized liquidity, used for pruning and tie-breaking.
    pub liquidity: f64,
    /// Milliseconds since UNIX epoch this edge's underlying pool state was
    /// last refreshed. Used by the graph to answer staleness queries.
    pub last_updated_ms: u64,
    /// Whether this edge currently participates in path search. Inactive
    /// edges are retained (not removed) for telemetry, per the graph's
    /// "no silent data loss" contract.
    pub active: bool,
}

impl EdgeData {
    pub fn new(
        pool_address: Address,
        dex: Dex,
        price: f64,
        fee: u32,
        liquidity: f64,
        last_updated_ms: u64,
    ) -> Self {
        Self {
            pool_address,
            dex,
            price,
            fee,
            weight: -price.ln(),
            liquidity,
            last_updated_ms,
            active: true,
        }
    }

    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_updated_ms)
    }

    pub fn is_stale(&self, now_ms: u64, stale_after_ms: u64) -> bool {
        self.age_ms(now_ms) > stale_after_ms
    }
}

/// Safely convert a `U256` to `f64`, handling magnitudes beyond `u128::MAX`
/// by extracting the top 64 significant bits as a mantissa.
pub fn u256_to_f64_safe(value: U256) -> f64 {
    if value.is_zero() {
        return 0.0;
    }
    if value <= U256::from(u128::MAX) {
        return value.to::<u128>() as f64;
    }
    let bits = 256 - value.leading_zeros();
    let shift = bits.saturating_sub(64);
    let mantissa = (value >> shift).to::<u64>() as f64;
    mantissa * 2_f64.powi(shift as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_weight_is_negative_log_price() {
        let e = EdgeData::new(Address::ZERO, Dex::UniswapV3, 2.0, 3000, 1.0, 0);
        assert!((e.weight - (-(2.0_f64).ln())).abs() < 1e-12);
    }

    #[test]
    fn stale_detection_respects_threshold() {
        let e = EdgeData::new(Address::ZERO, Dex::UniswapV3, 1.0, 0, 1.0, 1_000);
        assert!(!e.is_stale(1_500, 1_000));
        assert!(e.is_stale(3_000, 1_000));
    }

    #[test]
    fn u256_safe_conversion_handles_large_values() {
        let v = U256::MAX;
        let f = u256_to_f64_safe(v);
        assert!(f.is_finite() && f > 0.0);
    }
}
