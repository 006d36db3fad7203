//! The Profitability Engine: exact-integer swap math, per-pair profit
//! thresholds, and the full cost breakdown (flash-loan fee, gas, DEX
//! fees), covering a five-source flash-loan fee table and a per-pair
//! threshold map.

pub mod thresholds;

use alloy::primitives::{Address, U256};

use crate::config::EngineConfig;
use crate::dex::Pool;
use crate::error::ProfitabilityError;
use crate::oracle::PriceOracleValidator;
use crate::types::{ArbitragePath, FlashLoanConfig, ProfitBreakdown};

pub use thresholds::ThresholdTable;

/// Exact constant-product-equivalent swap output, rounding toward the
/// protocol (output floor) to match on-chain behavior. Uses the pool's
/// own effective price (already fee-adjusted) rather than re-deriving a
/// constant-product curve from `sqrt_price_x96`/`liquidity`, since every
/// DEX in this pack quotes via `slot0`/`getReserves`-equivalent calls
/// whose output this mirrors; the float multiply only selects *how much*
/// is owed, the final floor-division keeps the result exact-integer.
pub fn swap_out(pool: &Pool, token_in: Address, amount_in: U256) -> Option<U256> {
    let price = if token_in == pool.token0 {
        pool.effective_price_0_to_1()
    } else if token_in == pool.token1 {
        pool.effective_price_1_to_0()
    } else {
        return None;
    };
    apply_price(amount_in, price)
}

/// Apply an already fee-adjusted price to `amount_in`, floor-rounded to
/// stay exact-integer. Shared by `swap_out` (which derives `price` from a
/// full `Pool`) and the Path Finder (which only has the Liquidity Graph's
/// cached edge price).
pub fn apply_price(amount_in: U256, price: f64) -> Option<U256> {
    if amount_in.is_zero() {
        return Some(U256::ZERO);
    }
    if !price.is_finite() || price <= 0.0 {
        return None;
    }

    // Represent price as a rational scaled by 1e18 so the final division
    // floors exactly rather than through a lossy float multiply.
    const SCALE: f64 = 1e18;
    let scaled_price = (price * SCALE).floor();
    if !scaled_price.is_finite() || scaled_price <= 0.0 || scaled_price > u128::MAX as f64 {
        return None;
    }
    let price_scaled = U256::from(scaled_price as u128);
    amount_in.checked_mul(price_scaled)?.checked_div(U256::from(10u128.pow(18)))
}

/// Gas + flash-loan-fee + DEX-fee cost breakdown for one candidate path,
/// borrowing `borrow_token` via `flash_config`. `gas_price_wei` is the
/// current gas price (from `gas_cache`); conversion of gas cost into
/// `borrow_token` units goes through the Price Oracle Validator and is a
/// hard failure (not a best-effort guess) if the price isn't available.
pub fn calculate_detailed(
    path: &ArbitragePath,
    borrow_token_symbol: &str,
    native_symbol: &str,
    input_amount: U256,
    flash_config: FlashLoanConfig,
    gas_price_wei: U256,
    oracle: &PriceOracleValidator,
    threshold_table: &ThresholdTable,
    borrow_token: Address,
    end_token: Address,
) -> Result<ProfitBreakdown, ProfitabilityError> {
    let final_amount = path.hops.last().map(|h| h.amount_out).unwrap_or(U256::ZERO);

    let gross: i128 = to_i128_diff(final_amount, input_amount);

    let flash_fee = input_amount
        .checked_mul(U256::from(flash_config.fee_bps))
        .and_then(|v| v.checked_div(U256::from(10_000u32)))
        .ok_or(ProfitabilityError::Overflow)?;

    let total_gas_units: u64 = path.gas_estimate;
    let gas_wei = U256::from(total_gas_units)
        .checked_mul(gas_price_wei)
        .ok_or(ProfitabilityError::Overflow)?;

    let gas_in_token = if borrow_token_symbol == native_symbol {
        gas_wei
    } else {
        let native_price = oracle
            .current(native_symbol)
            .map_err(|e| ProfitabilityError::GasConversionFailed(e.to_string()))?;
        let borrow_price = oracle
            .current(borrow_token_symbol)
            .map_err(|e| ProfitabilityError::GasConversionFailed(e.to_string()))?;
        if borrow_price.price_scaled_1e18.is_zero() {
            return Err(ProfitabilityError::GasConversionFailed(
                "borrow token price is zero".into(),
            ));
        }
        gas_wei
            .checked_mul(native_price.price_scaled_1e18)
            .and_then(|v| v.checked_div(borrow_price.price_scaled_1e18))
            .ok_or(ProfitabilityError::Overflow)?
    };

    let total_cost = flash_fee
        .checked_add(gas_in_token)
        .ok_or(ProfitabilityError::Overflow)?;

    let net: i128 = gross
        .checked_sub(i128_from_u256(total_cost).ok_or(ProfitabilityError::Overflow)?)
        .ok_or(ProfitabilityError::Overflow)?;

    let input_i128 = i128_from_u256(input_amount).unwrap_or(1).max(1);
    let roi_bps = ((net.saturating_mul(10_000)) / input_i128) as i32;

    let threshold = threshold_table
        .for_pair(borrow_token, end_token)
        .ok_or(ProfitabilityError::MissingThreshold(borrow_token, end_token))?;

    let profitable = net > 0;
    let meets_threshold = net >= threshold;

    Ok(ProfitBreakdown {
        initial: input_amount,
        r#final: final_amount,
        gross,
        flash_fee,
        gas_wei,
        gas_in_token,
        total_cost,
        net,
        net_in_eth: None,
        net_in_usd: None,
        roi_bps,
        profitable,
        meets_threshold,
    })
}

fn to_i128_diff(a: U256, b: U256) -> i128 {
    if a >= b {
        i128_from_u256(a - b).unwrap_or(i128::MAX)
    } else {
        -(i128_from_u256(b - a).unwrap_or(i128::MAX))
    }
}

fn i128_from_u256(v: U256) -> Option<i128> {
    if v > U256::from(i128::MAX as u128) {
        None
    } else {
        Some(v.to::<u128>() as i128)
    }
}

/// Minimal invariant check used by property tests: `net + total_cost ==
/// gross` must hold exactly for every computed breakdown.
pub fn invariant_holds(breakdown: &ProfitBreakdown) -> bool {
    let total_cost_i128 = i128_from_u256(breakdown.total_cost).unwrap_or(i128::MAX);
    breakdown.net + total_cost_i128 == breakdown.gross && breakdown.net <= breakdown.gross
}

pub fn default_gas_price(cfg: &EngineConfig) -> U256 {
    // Placeholder until `gas_cache` supplies a live RPC-derived value.
    let _ = cfg;
    U256::from(50u128 * 10u128.pow(9))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::Dex;

    fn pool(token0: Address, token1: Address, fee: u32) -> Pool {
        Pool {
            address: Address::ZERO,
            token0,
            token1,
            fee,
            dex: Dex::UniswapV3,
            liquidity: U256::from(1_000_000_000u128),
            sqrt_price_x96: U256::from(1u128) << 96,
            decimals0: 18,
            decimals1: 18,
            tick_spacing: Some(60),
            last_update_block: 0,
        }
    }

    #[test]
    fn swap_out_respects_fee_and_is_floor_rounded() {
        let a = Address::from([1u8; 20]);
        let b = Address::from([2u8; 20]);
        let p = pool(a, b, 3000); // 0.3%
        let out = swap_out(&p, a, U256::from(1_000_000u128)).unwrap();
        // price is 1.0 pre-fee; after 0.3% fee output should be < input.
        assert!(out < U256::from(1_000_000u128));
    }

    #[test]
    fn swap_out_unknown_token_returns_none() {
        let a = Address::from([1u8; 20]);
        let b = Address::from([2u8; 20]);
        let other = Address::from([3u8; 20]);
        let p = pool(a, b, 3000);
        assert!(swap_out(&p, other, U256::from(1u64)).is_none());
    }

    #[test]
    fn net_plus_total_cost_equals_gross() {
        let breakdown = ProfitBreakdown {
            initial: U256::from(100u64),
            r#final: U256::from(105u64),
            gross: 5,
            flash_fee: U256::from(1u64),
            gas_wei: U256::ZERO,
            gas_in_token: U256::from(1u64),
            total_cost: U256::from(2u64),
            net: 3,
            net_in_eth: None,
            net_in_usd: None,
            roi_bps: 300,
            profitable: true,
            meets_threshold: true,
        };
        assert!(invariant_holds(&breakdown));
    }

    proptest::proptest! {
        /// `net <= gross` and `net + total_cost == gross` exactly, for any
        /// breakdown a non-negative flash fee and gas-in-token cost could
        /// produce.
        #[test]
        fn net_invariant_holds_for_any_cost_split(
            gross in -1_000_000_000i128..1_000_000_000i128,
            flash_fee in 0u64..1_000_000_000u64,
            gas_in_token in 0u64..1_000_000_000u64,
        ) {
            let total_cost = U256::from(flash_fee) + U256::from(gas_in_token);
            let total_cost_i128 = total_cost.to::<u128>() as i128;
            let net = gross - total_cost_i128;
            let breakdown = ProfitBreakdown {
                initial: U256::ZERO,
                r#final: U256::ZERO,
                gross,
                flash_fee: U256::from(flash_fee),
                gas_wei: U256::ZERO,
                gas_in_token: U256::from(gas_in_token),
                total_cost,
                net,
                net_in_eth: None,
                net_in_usd: None,
                roi_bps: 0,
                profitable: net > 0,
                meets_threshold: false,
            };
            proptest::prop_assert!(invariant_holds(&breakdown));
            proptest::prop_assert!(breakdown.net <= breakdown.gross);
        }

        /// `swap_out` must never produce more than the input times the
        /// pool's pre-fee price: a pool cannot manufacture value, and the
        /// floor-rounding must only ever lose precision, never gain it.
        #[test]
        fn swap_out_never_exceeds_input_at_unit_price(
            amount_in in 1u128..1_000_000_000_000u128,
            fee_bps in 0u32..10_000u32,
        ) {
            let a = Address::from([1u8; 20]);
            let b = Address::from([2u8; 20]);
            let p = pool(a, b, fee_bps);
            if let Some(out) = swap_out(&p, a, U256::from(amount_in)) {
                proptest::prop_assert!(out <= U256::from(amount_in));
            }
        }
    }
}
