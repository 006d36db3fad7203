//! Shared domain model: the data structures that flow between pipeline
//! stages, built on top of `dex::Pool`/`Dex` for on-chain state and the
//! full profit-accounting breakdown every candidate carries.

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::dex::Dex;

/// A token identity. Identity is the address; symbol/decimals are
/// display-only lookups layered on top (see `config::tokens`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token {
    pub address: Address,
    pub symbol: &'static str,
    pub decimals: u8,
}

/// One leg of an arbitrage path: a swap through a single pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrageHop {
    pub pool_id: Address,
    pub dex: Dex,
    pub token_in: Address,
    pub token_out: Address,
    #[serde(with = "u256_serde")]
    pub amount_in: U256,
    #[serde(with = "u256_serde")]
    pub amount_out: U256,
    pub fee_bps: u32,
}

/// An ordered, cyclic sequence of hops: `hops[0].token_in ==
/// hops.last().token_out`. Length bounded to `[2, MAX_PATH_LEN]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitragePath {
    pub hops: Vec<ArbitrageHop>,
    #[serde(with = "u256_serde")]
    pub gross_profit: U256,
    pub total_fees_bps: u32,
    pub gas_estimate: u64,
    /// Fraction of naive mid-price lost to finite liquidity, in bps.
    pub slippage_impact_bps: u32,
    pub flash_loan_provider: Option<FlashLoanSource>,
    /// Heuristic, non-gating annotation (supplement #2). Never consulted
    /// by the Profitability Engine's threshold check.
    pub confidence_score: f64,
}

impl ArbitragePath {
    pub fn start_token(&self) -> Option<Address> {
        self.hops.first().map(|h| h.token_in)
    }

    pub fn end_token(&self) -> Option<Address> {
        self.hops.last().map(|h| h.token_out)
    }

    pub fn hop_count(&self) -> usize {
        self.hops.len()
    }

    /// Structural validity: cyclic, adjacent hops chain, length in
    /// bounds, no self-edges.
    pub fn is_structurally_valid(&self, max_path_len: usize) -> bool {
        if self.hops.len() < 2 || self.hops.len() > max_path_len {
            return false;
        }
        if self.start_token() != self.end_token() {
            return false;
        }
        for pair in self.hops.windows(2) {
            if pair[0].token_out != pair[1].token_in {
                return false;
            }
        }
        self.hops.iter().all(|h| h.token_in != h.token_out)
    }

    pub fn confidence_level(&self) -> &'static str {
        if self.confidence_score >= 1.2 {
            "HIGH"
        } else if self.confidence_score >= 0.7 {
            "MEDIUM"
        } else {
            "LOW - VERIFY"
        }
    }
}

/// The five flash-loan sources the selector can choose between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlashLoanSource {
    Balancer,
    Aave,
    UniswapV3Pool,
    DyDx,
    HybridAaveV4,
}

impl FlashLoanSource {
    /// Flash-loan fee in bps. `pool_fee_bps` is required for
    /// `UniswapV3Pool` (the pool's own fee tier stands in for a fixed
    /// rate) and ignored otherwise.
    pub fn fee_bps(&self, pool_fee_bps: Option<u32>) -> u32 {
        match self {
            FlashLoanSource::Balancer => 0,
            FlashLoanSource::Aave => 9,
            FlashLoanSource::UniswapV3Pool => pool_fee_bps.unwrap_or(30),
            FlashLoanSource::DyDx => 2,
            FlashLoanSource::HybridAaveV4 => 9,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FlashLoanSource::Balancer => "Balancer",
            FlashLoanSource::Aave => "Aave",
            FlashLoanSource::UniswapV3Pool => "UniswapV3Pool",
            FlashLoanSource::DyDx => "dYdX",
            FlashLoanSource::HybridAaveV4 => "HybridAaveV4",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FlashLoanConfig {
    pub source: FlashLoanSource,
    pub fee_bps: u32,
    pub pool_fee_bps: Option<u32>,
}

/// Exact-integer profit accounting. Every field up to `net_in_usd` is
/// `U256`/`i128`; only the final display conversions are allowed to be
/// lossy (`rust_decimal`).
#[derive(Debug, Clone)]
pub struct ProfitBreakdown {
    pub initial: U256,
    pub r#final: U256,
    pub gross: i128,
    pub flash_fee: U256,
    pub gas_wei: U256,
    pub gas_in_token: U256,
    pub total_cost: U256,
    pub net: i128,
    pub net_in_eth: Option<rust_decimal::Decimal>,
    pub net_in_usd: Option<rust_decimal::Decimal>,
    pub roi_bps: i32,
    pub profitable: bool,
    pub meets_threshold: bool,
}

/// A validated price observation. `price_scaled_1e18` keeps the value
/// exact-integer; conversions to float happen only at display time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub symbol: String,
    #[serde(with = "u256_serde")]
    pub price_scaled_1e18: U256,
    pub source: String,
    pub ts_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreatRecommendation {
    PublicExecute,
    PrivateExecute,
    Abort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatAssessment {
    pub frontrun_prob: f64,
    pub backrun_prob: f64,
    pub sandwich_prob: f64,
    pub profit_erosion_bps: u32,
    pub recommendation: ThreatRecommendation,
    pub confidence: f64,
    pub reasoning: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Negligible,
    Low,
    Moderate,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFactor {
    pub category: &'static str,
    pub probability: f64,
    pub impact: f64,
    pub level: RiskLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskResult {
    pub overall_level: RiskLevel,
    pub composite_score: f64,
    pub factors: Vec<RiskFactor>,
    pub should_proceed: bool,
    pub requires_review: bool,
    pub recommendations: Vec<String>,
}

/// A shadow observation of a pending mempool transaction, retained only
/// for threat estimation. Never trusted for correctness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MempoolTxShadow {
    pub hash: String,
    pub to: Address,
    #[serde(with = "u256_serde")]
    pub gas_price: U256,
    pub gas_limit: u64,
    pub observed_at: u64,
}

/// `U256` doesn't implement `serde` directly in all configurations;
/// round-trip through its decimal string form instead.
mod u256_serde {
    use alloy::primitives::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<U256, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hop(token_in: Address, token_out: Address) -> ArbitrageHop {
        ArbitrageHop {
            pool_id: Address::ZERO,
            dex: Dex::UniswapV3,
            token_in,
            token_out,
            amount_in: U256::from(1u64),
            amount_out: U256::from(1u64),
            fee_bps: 30,
        }
    }

    #[test]
    fn path_requires_cyclic_structure() {
        let a = Address::from([1u8; 20]);
        let b = Address::from([2u8; 20]);
        let path = ArbitragePath {
            hops: vec![hop(a, b), hop(b, a)],
            gross_profit: U256::ZERO,
            total_fees_bps: 60,
            gas_estimate: 300_000,
            slippage_impact_bps: 0,
            flash_loan_provider: None,
            confidence_score: 1.0,
        };
        assert!(path.is_structurally_valid(4));
    }

    #[test]
    fn path_rejects_non_cyclic() {
        let a = Address::from([1u8; 20]);
        let b = Address::from([2u8; 20]);
        let c = Address::from([3u8; 20]);
        let path = ArbitragePath {
            hops: vec![hop(a, b), hop(b, c)],
            gross_profit: U256::ZERO,
            total_fees_bps: 60,
            gas_estimate: 300_000,
            slippage_impact_bps: 0,
            flash_loan_provider: None,
            confidence_score: 1.0,
        };
        assert!(!path.is_structurally_valid(4));
    }

    #[test]
    fn flash_loan_fee_table_matches_spec() {
        assert_eq!(FlashLoanSource::Balancer.fee_bps(None), 0);
        assert_eq!(FlashLoanSource::Aave.fee_bps(None), 9);
        assert_eq!(FlashLoanSource::DyDx.fee_bps(None), 2);
        assert_eq!(FlashLoanSource::UniswapV3Pool.fee_bps(Some(30)), 30);
    }
}
