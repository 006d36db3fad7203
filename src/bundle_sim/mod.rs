//! The Bundle Simulator ("Pre-Crime"): quantifies frontrun/backrun/
//! sandwich threat against a proposed bundle using a shadow of the
//! trailing mempool. `dashmap` backs the concurrent shadow map.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use alloy::primitives::{Address, U256};
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::BundleSimError;
use crate::types::{MempoolTxShadow, ThreatAssessment, ThreatRecommendation};

/// A proposed ordered bundle about to be submitted for pre-execution
/// simulation.
#[derive(Debug, Clone)]
pub struct ProposedBundle {
    pub target_contract: Address,
    pub gas_price: U256,
    pub gas_limit: u64,
    pub value_usd: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct ThreatThresholds {
    pub p_low: f64,
    pub p_high: f64,
    pub erosion_low_bps: u32,
    pub erosion_high_bps: u32,
    pub private_fallback_enabled: bool,
}

/// Drop-oldest LRU shadow of the last `K` mempool transactions, plus a
/// trailing window of private-bundle submission counts keyed by target
/// contract. Soft state only — never consulted for correctness, only for
/// threat estimation.
pub struct MempoolShadow {
    capacity: usize,
    order: Mutex<VecDeque<String>>,
    entries: DashMap<String, MempoolTxShadow>,
    private_bundle_counts: DashMap<Address, u64>,
    insert_counter: AtomicU64,
}

impl MempoolShadow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: Mutex::new(VecDeque::with_capacity(capacity)),
            entries: DashMap::new(),
            private_bundle_counts: DashMap::new(),
            insert_counter: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, tx: MempoolTxShadow) {
        let mut order = self.order.lock();
        if !self.entries.contains_key(&tx.hash) {
            if order.len() >= self.capacity {
                if let Some(oldest) = order.pop_front() {
                    self.entries.remove(&oldest);
                }
            }
            order.push_back(tx.hash.clone());
        }
        self.entries.insert(tx.hash.clone(), tx);
        self.insert_counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_private_bundle(&self, target: Address) {
        *self.private_bundle_counts.entry(target).or_insert(0) += 1;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn shadow_for_target(&self, target: Address) -> Vec<MempoolTxShadow> {
        self.entries
            .iter()
            .filter(|e| e.value().to == target)
            .map(|e| e.value().clone())
            .collect()
    }

    fn private_bundle_density(&self, target: Address) -> u64 {
        self.private_bundle_counts.get(&target).map(|v| *v).unwrap_or(0)
    }
}

/// Run the pre-execution simulation for `bundle` against `shadow`.
/// `net_profit` is the Profitability Engine's net-profit estimate (in the
/// borrow token's smallest unit) for the candidate this bundle executes;
/// it's used to abort outright when the estimated erosion would wipe out
/// the profit entirely, independent of the threat-probability bands.
pub fn simulate(
    bundle: &ProposedBundle,
    shadow: &MempoolShadow,
    thresholds: &ThreatThresholds,
    net_profit: i128,
) -> Result<ThreatAssessment, BundleSimError> {
    if shadow.is_empty() && shadow.private_bundle_density(bundle.target_contract) == 0 {
        // An empty shadow is valid soft state (no mempool traffic seen
        // yet), not an error: return a low-confidence, low-threat
        // assessment rather than failing the candidate.
        return Ok(ThreatAssessment {
            frontrun_prob: 0.0,
            backrun_prob: 0.0,
            sandwich_prob: 0.0,
            profit_erosion_bps: 0,
            recommendation: ThreatRecommendation::PublicExecute,
            confidence: 0.2,
            reasoning: vec!["mempool shadow empty; no competing traffic observed".to_string()],
        });
    }

    let targeting = shadow.shadow_for_target(bundle.target_contract);

    let frontrun_prob = if targeting.is_empty() {
        0.0
    } else {
        let competing = targeting
            .iter()
            .filter(|tx| tx.gas_price >= bundle.gas_price)
            .count();
        competing as f64 / targeting.len() as f64
    };

    // Backrun attractiveness: larger, higher-gas-limit bundles at low
    // relative gas price are more attractive to a backrunner.
    let gas_price_gwei = (bundle.gas_price / U256::from(10u128.pow(9))).to::<u128>() as f64;
    let complexity_factor = (bundle.gas_limit as f64 / 500_000.0).min(2.0);
    let value_factor = (bundle.value_usd / 10_000.0).min(3.0);
    let gas_discount = 1.0 / (1.0 + gas_price_gwei / 50.0);
    let backrun_prob = (complexity_factor * 0.3 + value_factor * 0.3 + gas_discount * 0.4).min(1.0);

    let sandwich_prob = frontrun_prob * backrun_prob;

    let private_density = shadow.private_bundle_density(bundle.target_contract) as f64;
    let private_competition = (private_density / 10.0).min(1.0);

    let combined_threat = (frontrun_prob * 0.35
        + sandwich_prob * 0.35
        + backrun_prob * 0.15
        + private_competition * 0.15)
        .clamp(0.0, 1.0);

    let profit_erosion_bps = (combined_threat * 1_000.0) as u32;

    let mut reasoning = Vec::new();
    reasoning.push(format!(
        "frontrun_prob={frontrun_prob:.2} from {} shadow txs targeting this contract",
        targeting.len()
    ));
    reasoning.push(format!("backrun_prob={backrun_prob:.2} from bundle value/complexity"));
    reasoning.push(format!("private_bundle_density={private_density}"));

    let erosion_estimate = (net_profit * profit_erosion_bps as i128) / 10_000;
    let net_after_erosion = net_profit - erosion_estimate;

    let recommendation = if net_after_erosion <= 0 {
        reasoning.push(format!(
            "net_profit={net_profit} minus estimated erosion {erosion_estimate} is non-positive"
        ));
        ThreatRecommendation::Abort
    } else if combined_threat < thresholds.p_low && profit_erosion_bps < thresholds.erosion_low_bps {
        ThreatRecommendation::PublicExecute
    } else if combined_threat >= thresholds.p_high && profit_erosion_bps >= thresholds.erosion_high_bps {
        if thresholds.private_fallback_enabled {
            ThreatRecommendation::PrivateExecute
        } else {
            ThreatRecommendation::Abort
        }
    } else if thresholds.private_fallback_enabled {
        ThreatRecommendation::PrivateExecute
    } else {
        ThreatRecommendation::Abort
    };

    Ok(ThreatAssessment {
        frontrun_prob,
        backrun_prob,
        sandwich_prob,
        profit_erosion_bps,
        recommendation,
        confidence: 0.5 + (targeting.len().min(10) as f64 / 20.0),
        reasoning,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_thresholds() -> ThreatThresholds {
        ThreatThresholds {
            p_low: 0.2,
            p_high: 0.6,
            erosion_low_bps: 50,
            erosion_high_bps: 300,
            private_fallback_enabled: true,
        }
    }

    #[test]
    fn drop_oldest_respects_capacity() {
        let shadow = MempoolShadow::new(2);
        for i in 0..5u64 {
            shadow.observe(MempoolTxShadow {
                hash: format!("0x{i}"),
                to: Address::ZERO,
                gas_price: U256::from(1u64),
                gas_limit: 21_000,
                observed_at: i,
            });
        }
        assert_eq!(shadow.len(), 2);
    }

    #[test]
    fn high_competing_gas_price_recommends_private_execute() {
        let shadow = MempoolShadow::new(100);
        let target = Address::from([7u8; 20]);
        for i in 0..10u64 {
            shadow.observe(MempoolTxShadow {
                hash: format!("0x{i}"),
                to: target,
                gas_price: U256::from(120u64), // 20% above bundle's 100
                gas_limit: 200_000,
                observed_at: i,
            });
        }

        let bundle = ProposedBundle {
            target_contract: target,
            gas_price: U256::from(100u64),
            gas_limit: 400_000,
            value_usd: 15.0 * 3_000.0, // 15 ETH bundle at ~$3000/ETH
        };

        let assessment = simulate(&bundle, &shadow, &default_thresholds(), 1_000_000_000_000_000_000).unwrap();
        assert!(assessment.frontrun_prob > 0.5);
        assert_eq!(assessment.recommendation, ThreatRecommendation::PrivateExecute);
    }

    #[test]
    fn non_positive_net_after_erosion_aborts_regardless_of_threat_band() {
        let shadow = MempoolShadow::new(100);
        let target = Address::from([9u8; 20]);
        shadow.observe(MempoolTxShadow {
            hash: "0x1".to_string(),
            to: target,
            gas_price: U256::from(1u64),
            gas_limit: 21_000,
            observed_at: 0,
        });

        let bundle = ProposedBundle {
            target_contract: target,
            gas_price: U256::from(100u64),
            gas_limit: 21_000,
            value_usd: 1.0,
        };

        // This bundle's threat band alone would recommend proceeding
        // (public or private), but a non-positive net profit must still
        // force Abort.
        let assessment = simulate(&bundle, &shadow, &default_thresholds(), 0).unwrap();
        assert_eq!(assessment.recommendation, ThreatRecommendation::Abort);
    }

    #[test]
    fn empty_shadow_recommends_public_execute() {
        let shadow = MempoolShadow::new(100);
        let bundle = ProposedBundle {
            target_contract: Address::ZERO,
            gas_price: U256::from(50u64),
            gas_limit: 200_000,
            value_usd: 100.0,
        };
        let assessment = simulate(&bundle, &shadow, &default_thresholds(), 1_000_000_000_000_000_000).unwrap();
        assert_eq!(assessment.recommendation, ThreatRecommendation::PublicExecute);
    }
}
