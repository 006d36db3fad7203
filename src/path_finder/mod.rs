//! The Path Finder: bounded-depth cycle enumeration over the Liquidity
//! Graph, from a start token back to itself, with per-candidate amount
//! simulation. A bounded DFS surfaces the *set* of viable candidate
//! paths (bounded hops, ranked, each probed at several sizes) rather
//! than a single global optimum, using `-ln(price)` edge weights for the
//! liquidity-weighted tie-break. Callers parallelize *across* start
//! tokens; the DFS within one start token is sequential (graph reads are
//! cheap, recursion depth is capped by `max_hops`).

use std::collections::HashSet;

use alloy::primitives::{Address, U256};

use crate::error::PathFinderError;
use crate::graph::{EdgeData, GraphView};
use crate::profitability::apply_price;
use crate::types::{ArbitrageHop, ArbitragePath, FlashLoanSource};

/// Reference trade sizes tried for every candidate cycle, as multipliers
/// of `reference_size`. Mirrors a geometric probe around the "typical"
/// size rather than a single fixed amount, since the profitable size for
/// a given cycle depends on how deep its shallowest pool is.
pub const AMOUNT_MULTIPLIERS: [f64; 4] = [0.1, 0.3, 1.0, 3.0];

#[derive(Debug, Clone)]
pub struct PathFinderConfig {
    pub max_hops: usize,
    pub min_liquidity: f64,
    pub max_edge_age_ms: u64,
    pub reference_size: U256,
    pub gas_per_hop: u64,
}

struct SearchCtx<'a> {
    view: &'a GraphView,
    start: Address,
    now_ms: u64,
    cfg: &'a PathFinderConfig,
}

/// One unexpanded edge traversal recorded during the DFS.
#[derive(Clone)]
struct PendingHop {
    pool_id: Address,
    dex: crate::dex::Dex,
    token_in: Address,
    token_out: Address,
    price: f64,
    fee_bps: u32,
    liquidity: f64,
}

/// Enumerate simple cycles starting and ending at `start`, with length in
/// `[2, cfg.max_hops]`, and build a ranked, amount-simulated
/// `ArbitragePath` for each. Cycles touching a mid-path edge with zero
/// (or sub-minimum) liquidity are dropped silently, not surfaced as
/// errors, since a thin edge simply isn't a usable candidate.
pub fn find_paths(
    view: &GraphView,
    start: Address,
    now_ms: u64,
    cfg: &PathFinderConfig,
) -> Result<Vec<ArbitragePath>, PathFinderError> {
    if cfg.max_hops < 2 {
        return Err(PathFinderError::InvalidMaxHops(cfg.max_hops));
    }
    if view.get_node(start).is_none() {
        return Err(PathFinderError::UnknownStartToken(start));
    }

    let ctx = SearchCtx {
        view,
        start,
        now_ms,
        cfg,
    };

    let mut raw_cycles: Vec<Vec<PendingHop>> = Vec::new();
    let mut trail = Vec::new();
    let mut visited = HashSet::new();
    visited.insert(start);
    dfs(&ctx, start, &mut trail, &mut visited, &mut raw_cycles);

    let mut scored: Vec<(ArbitragePath, f64)> = raw_cycles
        .iter()
        .filter_map(|cycle| build_candidate(cycle, &ctx).map(|path| (path, aggregate_liquidity(cycle))))
        .collect();

    // Tie-break order: fewer hops first, then higher aggregate
    // liquidity, then lexicographically smaller pool-id tuple.
    scored.sort_by(|(a, a_liq), (b, b_liq)| {
        a.hop_count()
            .cmp(&b.hop_count())
            .then(b_liq.partial_cmp(a_liq).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| pool_id_tuple(a).cmp(&pool_id_tuple(b)))
    });

    Ok(scored.into_iter().map(|(path, _)| path).collect())
}

fn aggregate_liquidity(cycle: &[PendingHop]) -> f64 {
    cycle.iter().map(|h| h.liquidity).sum()
}

fn pool_id_tuple(path: &ArbitragePath) -> Vec<[u8; 20]> {
    path.hops.iter().map(|h| h.pool_id.into_array()).collect()
}

fn dfs(
    ctx: &SearchCtx,
    current: Address,
    trail: &mut Vec<PendingHop>,
    visited: &mut HashSet<Address>,
    out: &mut Vec<Vec<PendingHop>>,
) {
    if trail.len() >= ctx.cfg.max_hops {
        return;
    }

    for (next_token, edge) in ctx.view.neighbors(
        current,
        ctx.now_ms,
        ctx.cfg.min_liquidity,
        ctx.cfg.max_edge_age_ms,
    ) {
        if edge.liquidity <= 0.0 {
            continue;
        }

        let hop = PendingHop {
            pool_id: edge.pool_address,
            dex: edge.dex,
            token_in: current,
            token_out: next_token,
            price: edge.price,
            fee_bps: edge.fee,
            liquidity: edge.liquidity,
        };

        if next_token == ctx.start && trail.len() + 1 >= 2 {
            let mut cycle = trail.clone();
            cycle.push(hop.clone());
            out.push(cycle);
            // A cycle closing here doesn't preclude a longer cycle
            // through the same edge set in principle, but re-entering the
            // start node ends this branch: the start token is already in
            // `visited`, so the loop below naturally stops extending it.
            continue;
        }

        if visited.contains(&next_token) {
            continue;
        }

        trail.push(hop);
        visited.insert(next_token);
        dfs(ctx, next_token, trail, visited, out);
        visited.remove(&next_token);
        trail.pop();
    }
}

fn edge_dex(edge: &EdgeData) -> crate::dex::Dex {
    edge.dex
}

/// Simulate `cycle` across the geometric amount series and keep the
/// highest-profit size that didn't bottom out in a zero-output hop.
fn build_candidate(cycle: &[PendingHop], ctx: &SearchCtx) -> Option<ArbitragePath> {
    let _ = edge_dex;
    let mut best: Option<(U256, Vec<ArbitrageHop>, u32)> = None;

    for mult in AMOUNT_MULTIPLIERS {
        let scaled = scale_amount(ctx.cfg.reference_size, mult);
        if scaled.is_zero() {
            continue;
        }

        let mut amount = scaled;
        let mut hops = Vec::with_capacity(cycle.len());
        let mut slippage_acc = 0.0f64;
        let mut ok = true;

        for hop in cycle {
            let amount_in = amount;
            let Some(amount_out) = apply_price(amount_in, hop.price) else {
                ok = false;
                break;
            };
            if amount_out.is_zero() {
                ok = false;
                break;
            }
            let fraction_of_liquidity = if hop.liquidity > 0.0 {
                amount_in.to::<u128>() as f64 / hop.liquidity
            } else {
                1.0
            };
            slippage_acc += fraction_of_liquidity.min(1.0);

            hops.push(ArbitrageHop {
                pool_id: hop.pool_id,
                dex: hop.dex,
                token_in: hop.token_in,
                token_out: hop.token_out,
                amount_in,
                amount_out,
                fee_bps: hop.fee_bps,
            });
            amount = amount_out;
        }

        if !ok {
            continue;
        }

        if amount > scaled {
            let slippage_bps = ((slippage_acc / cycle.len() as f64) * 10_000.0).min(10_000.0) as u32;
            match &best {
                Some((best_amount, ..)) if *best_amount >= amount.checked_sub(scaled).unwrap_or(U256::ZERO) => {}
                _ => best = Some((amount.checked_sub(scaled).unwrap_or(U256::ZERO), hops, slippage_bps)),
            }
        }
    }

    let (gross_profit, hops, slippage_impact_bps) = best?;
    let total_fees_bps: u32 = hops.iter().map(|h| h.fee_bps).sum();
    let confidence_score = confidence_for(hops.len(), slippage_impact_bps);

    Some(ArbitragePath {
        hops,
        gross_profit,
        total_fees_bps,
        gas_estimate: ctx.cfg.gas_per_hop.saturating_mul(cycle.len() as u64),
        slippage_impact_bps,
        flash_loan_provider: None::<FlashLoanSource>,
        confidence_score,
    })
}

fn scale_amount(reference: U256, multiplier: f64) -> U256 {
    if multiplier <= 0.0 {
        return U256::ZERO;
    }
    const SCALE: f64 = 1e6;
    let scaled_multiplier = (multiplier * SCALE).round() as u128;
    reference
        .checked_mul(U256::from(scaled_multiplier))
        .and_then(|v| v.checked_div(U256::from(SCALE as u128)))
        .unwrap_or(U256::ZERO)
}

/// Heuristic, non-gating confidence annotation (supplement #2): shorter
/// paths with lower simulated slippage score higher. Never consulted by
/// the Profitability Engine's pass/fail threshold check.
fn confidence_for(hop_count: usize, slippage_impact_bps: u32) -> f64 {
    let hop_penalty = 1.0 - (hop_count.saturating_sub(2) as f64 * 0.15);
    let slippage_penalty = 1.0 - (slippage_impact_bps as f64 / 10_000.0);
    (hop_penalty * slippage_penalty * 1.5).clamp(0.0, 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::Dex;
    use crate::graph::{ArbitrageGraph, PoolUpdate};

    fn pool(address: Address, token0: Address, token1: Address) -> crate::dex::Pool {
        crate::dex::Pool {
            address,
            token0,
            token1,
            fee: 3000,
            dex: Dex::UniswapV3,
            liquidity: U256::from(1_000_000_000_000u128),
            sqrt_price_x96: U256::from(1u128) << 96,
            decimals0: 18,
            decimals1: 18,
            tick_spacing: Some(60),
            last_update_block: 1,
        }
    }

    fn default_config() -> PathFinderConfig {
        PathFinderConfig {
            max_hops: 4,
            min_liquidity: 0.0,
            max_edge_age_ms: u64::MAX,
            reference_size: U256::from(1_000_000u128),
            gas_per_hop: 120_000,
        }
    }

    #[test]
    fn rejects_max_hops_below_two() {
        let g = ArbitrageGraph::new();
        let view = g.snapshot();
        let mut cfg = default_config();
        cfg.max_hops = 1;
        let err = find_paths(&view, Address::ZERO, 0, &cfg).unwrap_err();
        assert!(matches!(err, PathFinderError::InvalidMaxHops(1)));
    }

    #[test]
    fn rejects_unknown_start_token() {
        let g = ArbitrageGraph::new();
        let view = g.snapshot();
        let cfg = default_config();
        let err = find_paths(&view, Address::from([1u8; 20]), 0, &cfg).unwrap_err();
        assert!(matches!(err, PathFinderError::UnknownStartToken(_)));
    }

    #[test]
    fn finds_two_hop_cycle_between_two_tokens() {
        let mut g = ArbitrageGraph::new();
        let a = Address::from([1u8; 20]);
        let b = Address::from([2u8; 20]);
        g.apply_block(
            &[PoolUpdate {
                pool: pool(Address::from([9u8; 20]), a, b),
                block_number: 1,
                observed_at_ms: 1_000,
            }],
            1_000,
        )
        .unwrap();
        let view = g.snapshot();

        let cfg = default_config();
        let paths = find_paths(&view, a, 1_000, &cfg).unwrap();
        assert!(paths.iter().any(|p| p.hop_count() == 2));
        for p in &paths {
            assert!(p.is_structurally_valid(cfg.max_hops));
        }
    }

    #[test]
    fn no_cycle_with_only_a_single_isolated_token() {
        let mut g = ArbitrageGraph::new();
        let a = Address::from([1u8; 20]);
        let b = Address::from([2u8; 20]);
        g.apply_block(
            &[PoolUpdate {
                pool: pool(Address::from([9u8; 20]), a, b),
                block_number: 1,
                observed_at_ms: 1_000,
            }],
            1_000,
        )
        .unwrap();
        let view = g.snapshot();
        let cfg = default_config();
        // `b` only connects back to `a`, so the only cycle from `b` is
        // the trivial 2-hop b->a->b, which must still be returned.
        let paths = find_paths(&view, b, 1_000, &cfg).unwrap();
        assert!(paths.iter().all(|p| p.hop_count() >= 2));
    }
}
