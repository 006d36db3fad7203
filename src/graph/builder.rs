//! The Liquidity Graph: a directed multigraph of pools, keyed by token
//! address, with transactional per-block updates. A partially-applied
//! block is rolled back, inactive pools are filtered from `neighbors()`
//! but retained in storage, and a stalled feed clock surfaces
//! `GraphError::StaleFeed`.

use std::collections::HashMap;

use alloy::primitives::Address;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use super::types::EdgeData;
use crate::config::thresholds;
use crate::dex::Pool;
use crate::error::GraphError;

/// A single confirmed-block pool update.
#[derive(Debug, Clone)]
pub struct PoolUpdate {
    pub pool: Pool,
    pub block_number: u64,
    pub observed_at_ms: u64,
}

/// An immutable view over the graph, valid for the lifetime of one
/// discovery round. The Orchestrator hands this to worker tasks so no
/// task ever mutates the live graph.
#[derive(Clone)]
pub struct GraphView {
    graph: DiGraph<Address, EdgeData>,
    token_to_node: HashMap<Address, NodeIndex>,
    pub as_of_block: u64,
}

impl GraphView {
    pub fn get_node(&self, token: Address) -> Option<NodeIndex> {
        self.token_to_node.get(&token).copied()
    }

    pub fn get_token(&self, node: NodeIndex) -> Option<Address> {
        self.graph.node_weight(node).copied()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn inner(&self) -> &DiGraph<Address, EdgeData> {
        &self.graph
    }

    /// Active outgoing edges from `token`, filtering out pools below
    /// `min_liquidity` or older than `max_age_ms`. Inactive edges are
    /// never removed from the underlying graph, only skipped here.
    pub fn neighbors(
        &self,
        token: Address,
        now_ms: u64,
        min_liquidity: f64,
        max_age_ms: u64,
    ) -> Vec<(Address, &EdgeData)> {
        let Some(node) = self.get_node(token) else {
            return Vec::new();
        };
        self.graph
            .edges(node)
            .filter(|e| {
                let d = e.weight();
                d.active && d.liquidity >= min_liquidity && !d.is_stale(now_ms, max_age_ms)
            })
            .filter_map(|e| self.get_token(e.target()).map(|t| (t, e.weight())))
            .collect()
    }
}

/// Owns the live graph. Single-writer (the Graph Updater task); readers
/// take a `GraphView` snapshot.
pub struct ArbitrageGraph {
    graph: DiGraph<Address, EdgeData>,
    token_to_node: HashMap<Address, NodeIndex>,
    current_block: u64,
    last_feed_advance_ms: u64,
}

impl Default for ArbitrageGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl ArbitrageGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            token_to_node: HashMap::new(),
            current_block: 0,
            last_feed_advance_ms: 0,
        }
    }

    fn get_or_create_node(&mut self, token: Address) -> NodeIndex {
        if let Some(&node) = self.token_to_node.get(&token) {
            node
        } else {
            let node = self.graph.add_node(token);
            self.token_to_node.insert(token, node);
            node
        }
    }

    /// Apply a batch of pool updates belonging to a single block,
    /// transactionally: if any update in the batch is structurally
    /// invalid, none of the batch's edges are committed and the graph is
    /// left exactly as it was before the call. An update for a block
    /// older than `current_block` is rejected outright (mid-block /
    /// out-of-order updates are rejected).
    pub fn apply_block(&mut self, updates: &[PoolUpdate], now_ms: u64) -> Result<(), GraphError> {
        if let Some(first) = updates.first() {
            if first.block_number < self.current_block {
                return Err(GraphError::PartialUpdate(format!(
                    "update for block {} precedes current block {}",
                    first.block_number, self.current_block
                )));
            }
        }

        // Validate the whole batch before mutating anything, so a
        // partially-applied block is impossible by construction.
        for u in updates {
            Self::validate_pool(&u.pool)?;
        }

        for u in updates {
            self.upsert_pool(&u.pool, now_ms);
        }

        if let Some(last) = updates.last() {
            self.current_block = last.block_number;
        }
        self.last_feed_advance_ms = now_ms;

        Ok(())
    }

    fn validate_pool(pool: &Pool) -> Result<(), GraphError> {
        if !pool.is_price_valid() {
            return Err(GraphError::InvalidPrice(pool.address));
        }
        let round_trip = pool.price_0_to_1() * pool.price_1_to_0();
        if (round_trip - 1.0).abs() > thresholds::MAX_ROUND_TRIP_DEVIATION {
            return Err(GraphError::RoundTripDeviation(pool.address));
        }
        Ok(())
    }

    fn upsert_pool(&mut self, pool: &Pool, now_ms: u64) {
        let node0 = self.get_or_create_node(pool.token0);
        let node1 = self.get_or_create_node(pool.token1);
        let liquidity = pool.liquidity_normalized();

        if let Some(edge) = self.find_edge_mut(node0, node1, pool.address) {
            Self::refresh_edge(edge, pool, pool.effective_price_0_to_1(), liquidity, now_ms);
        } else {
            let price = pool.effective_price_0_to_1();
            if Self::price_in_range(price) {
                let edge = EdgeData::new(pool.address, pool.dex, price, pool.fee, liquidity, now_ms);
                self.graph.add_edge(node0, node1, edge);
            }
        }

        if let Some(edge) = self.find_edge_mut(node1, node0, pool.address) {
            Self::refresh_edge(edge, pool, pool.effective_price_1_to_0(), liquidity, now_ms);
        } else {
            let price = pool.effective_price_1_to_0();
            if Self::price_in_range(price) {
                let edge = EdgeData::new(pool.address, pool.dex, price, pool.fee, liquidity, now_ms);
                self.graph.add_edge(node1, node0, edge);
            }
        }
    }

    fn price_in_range(price: f64) -> bool {
        price.is_finite() && price > thresholds::MIN_EDGE_PRICE && price < thresholds::MAX_EDGE_PRICE
    }

    fn refresh_edge(edge: &mut EdgeData, pool: &Pool, price: f64, liquidity: f64, now_ms: u64) {
        if Self::price_in_range(price) {
            edge.price = price;
            edge.weight = -price.ln();
            edge.liquidity = liquidity;
            edge.fee = pool.fee;
            edge.last_updated_ms = now_ms;
            edge.active = true;
        } else {
            // Price fell out of range: deactivate but retain for
            // telemetry per the "no silent data loss" contract.
            edge.active = false;
            edge.last_updated_ms = now_ms;
        }
    }

    fn find_edge_mut(
        &mut self,
        from: NodeIndex,
        to: NodeIndex,
        pool_address: Address,
    ) -> Option<&mut EdgeData> {
        let edge_id = self
            .graph
            .edges(from)
            .find(|e| e.target() == to && e.weight().pool_address == pool_address)
            .map(|e| e.id())?;
        self.graph.edge_weight_mut(edge_id)
    }

    /// Mark every edge belonging to `pool_address` inactive without
    /// removing it from storage. Used when a pool's liquidity drops
    /// below the configured minimum or it exceeds `max_pool_age_blocks`.
    pub fn deactivate_pool(&mut self, pool_address: Address) {
        for edge in self.graph.edge_weights_mut() {
            if edge.pool_address == pool_address {
                edge.active = false;
            }
        }
    }

    /// Feed staleness check: if `now_ms` has advanced past
    /// `max_stale_ms` since the last successfully applied block, the
    /// Graph Updater should surface `StaleFeed` to the Safety Governor.
    pub fn check_feed_staleness(&self, now_ms: u64, max_stale_ms: u64) -> Result<(), GraphError> {
        let age = now_ms.saturating_sub(self.last_feed_advance_ms);
        if self.last_feed_advance_ms > 0 && age > max_stale_ms {
            return Err(GraphError::StaleFeed {
                pool: Address::ZERO,
                age_ms: age,
            });
        }
        Ok(())
    }

    pub fn snapshot(&self) -> GraphView {
        GraphView {
            graph: self.graph.clone(),
            token_to_node: self.token_to_node.clone(),
            as_of_block: self.current_block,
        }
    }

    pub fn get_node(&self, token: Address) -> Option<NodeIndex> {
        self.token_to_node.get(&token).copied()
    }

    pub fn get_token(&self, node: NodeIndex) -> Option<Address> {
        self.graph.node_weight(node).copied()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn current_block(&self) -> u64 {
        self.current_block
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tokens;
    use crate::dex::Dex;
    use alloy::primitives::U256;

    fn sample_pool(address: Address, token0: Address, token1: Address) -> Pool {
        Pool {
            address,
            token0,
            token1,
            fee: 3000,
            dex: Dex::UniswapV3,
            liquidity: U256::from(1_000_000_000u128),
            sqrt_price_x96: U256::from(1u128) << 96,
            decimals0: 18,
            decimals1: 18,
            tick_spacing: Some(60),
            last_update_block: 1,
        }
    }

    #[test]
    fn apply_block_creates_bidirectional_edges() {
        let mut g = ArbitrageGraph::new();
        let a = tokens::WMON;
        let b = tokens::USDC;
        let updates = vec![PoolUpdate {
            pool: sample_pool(Address::from([9u8; 20]), a, b),
            block_number: 1,
            observed_at_ms: 1_000,
        }];
        g.apply_block(&updates, 1_000).unwrap();
        let view = g.snapshot();
        assert_eq!(view.node_count(), 2);
        assert_eq!(view.edge_count(), 2);
    }

    #[test]
    fn apply_block_rejects_out_of_order_blocks() {
        let mut g = ArbitrageGraph::new();
        let a = tokens::WMON;
        let b = tokens::USDC;
        let updates = vec![PoolUpdate {
            pool: sample_pool(Address::from([9u8; 20]), a, b),
            block_number: 5,
            observed_at_ms: 1_000,
        }];
        g.apply_block(&updates, 1_000).unwrap();

        let stale_updates = vec![PoolUpdate {
            pool: sample_pool(Address::from([10u8; 20]), a, b),
            block_number: 3,
            observed_at_ms: 2_000,
        }];
        assert!(g.apply_block(&stale_updates, 2_000).is_err());
    }

    #[test]
    fn partial_block_failure_rolls_back_entirely() {
        let mut g = ArbitrageGraph::new();
        let a = tokens::WMON;
        let b = tokens::USDC;
        let c = tokens::USDT;

        let mut bad_pool = sample_pool(Address::from([11u8; 20]), b, c);
        bad_pool.sqrt_price_x96 = U256::ZERO; // forces price 0 -> invalid

        let updates = vec![
            PoolUpdate {
                pool: sample_pool(Address::from([9u8; 20]), a, b),
                block_number: 1,
                observed_at_ms: 1_000,
            },
            PoolUpdate {
                pool: bad_pool,
                block_number: 1,
                observed_at_ms: 1_000,
            },
        ];

        assert!(g.apply_block(&updates, 1_000).is_err());
        assert_eq!(g.node_count(), 0);
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn deactivate_pool_retains_storage() {
        let mut g = ArbitrageGraph::new();
        let a = tokens::WMON;
        let b = tokens::USDC;
        let pool_addr = Address::from([9u8; 20]);
        let updates = vec![PoolUpdate {
            pool: sample_pool(pool_addr, a, b),
            block_number: 1,
            observed_at_ms: 1_000,
        }];
        g.apply_block(&updates, 1_000).unwrap();
        g.deactivate_pool(pool_addr);

        let view = g.snapshot();
        assert_eq!(view.edge_count(), 2, "edges retained for telemetry");
        assert!(view.neighbors(a, 1_000, 0.0, u64::MAX).is_empty());
    }

    #[test]
    fn stale_feed_detected_past_threshold() {
        let mut g = ArbitrageGraph::new();
        let a = tokens::WMON;
        let b = tokens::USDC;
        let updates = vec![PoolUpdate {
            pool: sample_pool(Address::from([9u8; 20]), a, b),
            block_number: 1,
            observed_at_ms: 1_000,
        }];
        g.apply_block(&updates, 1_000).unwrap();
        assert!(g.check_feed_staleness(2_000, 5_000).is_ok());
        assert!(g.check_feed_staleness(20_000, 5_000).is_err());
    }
}
