//! Append-only JSONL persistence for four logs: opportunities,
//! executions, oracle history, and safety events. Each log gets its own
//! writer and typed record via
//! `OpenOptions::new().create(true).append(true)` +
//! `serde_json::to_string` + `writeln!`.
//!
//! Every writer is fire-and-forget from the caller's perspective in the
//! sense that a failed write surfaces a `PersistenceError` but never
//! panics and never blocks the pipeline on retry; callers decide whether
//! a write failure is fatal.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use alloy::primitives::Address;
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::PersistenceError;
use crate::types::{ArbitragePath, RiskResult, ThreatAssessment};

/// One row of the opportunities log: every candidate that reached the
/// end of the pipeline, whether or not it was dispatched.
#[derive(Debug, Clone, Serialize)]
pub struct OpportunityRecord {
    pub ts_ms: u64,
    pub chain_id: u64,
    pub path: ArbitragePath,
    pub gross_profit: String,
    pub net_profit: i128,
    pub risk: RiskResult,
    pub threat: ThreatAssessment,
    pub dispatched: bool,
    pub decision_reason: String,
}

/// One row of the executions log: the outcome of an actual dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub ts_ms: u64,
    pub tx_hash: Option<String>,
    pub bundle_hash: Option<String>,
    pub status: String,
    pub realized_profit: Option<i128>,
    pub source: &'static str,
}

/// One row of the oracle history log: a validated price transition.
#[derive(Debug, Clone, Serialize)]
pub struct OracleHistoryRecord {
    pub ts_ms: u64,
    pub symbol: String,
    pub price_scaled_1e18: String,
    pub source: String,
}

/// One row of the safety events log: a circuit-breaker / emergency-stop
/// / rate-limiter state transition, with the reason that caused it.
#[derive(Debug, Clone, Serialize)]
pub struct SafetyEventRecord {
    pub ts_ms: u64,
    pub component: &'static str,
    pub event: String,
    pub reason: Option<String>,
}

/// A single append-only JSONL file. Serialization is centralized here so
/// every log shares the same failure behavior: the file handle is
/// reopened on every write rather than held open, since the engine's
/// write volume (one row per pipeline outcome) doesn't justify the
/// complexity of a persistent handle, and reopening survives external
/// log rotation.
struct JsonlLog {
    path: PathBuf,
    /// Serializes writers across tasks; `std::fs::File` isn't otherwise
    /// safe to interleave writes on from multiple tokio tasks.
    lock: Mutex<()>,
}

impl JsonlLog {
    fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn append<T: Serialize>(&self, record: &T) -> Result<(), PersistenceError> {
        let _guard = self.lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| PersistenceError::Open(self.path.display().to_string(), e.to_string()))?;

        let json = serde_json::to_string(record)
            .map_err(|e| PersistenceError::Write(e.to_string()))?;
        writeln!(file, "{json}").map_err(|e| PersistenceError::Write(e.to_string()))?;
        Ok(())
    }
}

/// Owns the four on-disk logs rooted under one directory. The directory
/// is created lazily on first write, not at construction, so a dry-run
/// engine never touches disk.
pub struct PersistenceStore {
    opportunities: JsonlLog,
    executions: JsonlLog,
    oracle_history: JsonlLog,
    safety_events: JsonlLog,
}

impl PersistenceStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            opportunities: JsonlLog::new(root.join("opportunities.jsonl")),
            executions: JsonlLog::new(root.join("executions.jsonl")),
            oracle_history: JsonlLog::new(root.join("oracle_history.jsonl")),
            safety_events: JsonlLog::new(root.join("safety_events.jsonl")),
        }
    }

    pub fn record_opportunity(&self, record: &OpportunityRecord) -> Result<(), PersistenceError> {
        self.opportunities.append(record)
    }

    pub fn record_execution(&self, record: &ExecutionRecord) -> Result<(), PersistenceError> {
        self.executions.append(record)
    }

    pub fn record_oracle_history(
        &self,
        record: &OracleHistoryRecord,
    ) -> Result<(), PersistenceError> {
        self.oracle_history.append(record)
    }

    pub fn record_safety_event(&self, record: &SafetyEventRecord) -> Result<(), PersistenceError> {
        self.safety_events.append(record)
    }
}

/// Helper for dispatch call sites: turns a pool address list's worth of
/// context into a stable decision-reason string for the opportunities
/// log, so the log stays informative without dispatch callers building
/// ad hoc strings inline.
pub fn decision_reason(dispatched: bool, start_token: Option<Address>, hops: usize) -> String {
    if dispatched {
        format!("dispatched ({hops} hops from {start_token:?})")
    } else {
        format!("not dispatched ({hops} hops from {start_token:?})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, U256};
    use crate::dex::Dex;
    use crate::types::{ArbitrageHop, ArbitragePath, RiskFactor, RiskLevel, ThreatRecommendation};

    fn sample_path() -> ArbitragePath {
        ArbitragePath {
            hops: vec![ArbitrageHop {
                pool_id: Address::ZERO,
                dex: Dex::UniswapV3,
                token_in: Address::ZERO,
                token_out: Address::ZERO,
                amount_in: U256::from(1u64),
                amount_out: U256::from(2u64),
                fee_bps: 30,
            }],
            gross_profit: U256::from(1u64),
            total_fees_bps: 30,
            gas_estimate: 21_000,
            slippage_impact_bps: 5,
            flash_loan_provider: None,
            confidence_score: 0.5,
        }
    }

    #[test]
    fn writes_and_reads_back_jsonl_lines() {
        let dir = tempdir();
        let store = PersistenceStore::new(&dir);

        let risk = RiskResult {
            overall_level: RiskLevel::Low,
            composite_score: 0.1,
            factors: vec![RiskFactor {
                category: "capital",
                probability: 0.1,
                impact: 0.1,
                level: RiskLevel::Low,
            }],
            should_proceed: true,
            requires_review: false,
            recommendations: vec![],
        };
        let threat = ThreatAssessment {
            frontrun_prob: 0.0,
            backrun_prob: 0.0,
            sandwich_prob: 0.0,
            profit_erosion_bps: 0,
            recommendation: ThreatRecommendation::PublicExecute,
            confidence: 0.9,
            reasoning: vec![],
        };

        store
            .record_opportunity(&OpportunityRecord {
                ts_ms: 1,
                chain_id: 1,
                path: sample_path(),
                gross_profit: "1".into(),
                net_profit: 1,
                risk,
                threat,
                dispatched: true,
                decision_reason: "test".into(),
            })
            .unwrap();

        let contents = std::fs::read_to_string(dir.join("opportunities.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 1);
        let parsed: serde_json::Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(parsed["chain_id"], 1);
    }

    #[test]
    fn appends_rather_than_truncates() {
        let dir = tempdir();
        let store = PersistenceStore::new(&dir);
        for i in 0..3u64 {
            store
                .record_safety_event(&SafetyEventRecord {
                    ts_ms: i,
                    component: "circuit_breaker",
                    event: "tripped".into(),
                    reason: Some("test".into()),
                })
                .unwrap();
        }
        let contents = std::fs::read_to_string(dir.join("safety_events.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 3);
    }

    #[test]
    fn open_failure_is_reported_not_panicked() {
        let log = JsonlLog::new("/nonexistent-dir-for-test/should/not/exist.jsonl");
        let err = log.append(&serde_json::json!({"a": 1})).unwrap_err();
        assert!(matches!(err, PersistenceError::Open(_, _)));
    }

    fn tempdir() -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!(
            "arb-engine-persistence-test-{:?}",
            std::thread::current().id()
        ));
        let _ = std::fs::create_dir_all(&p);
        p
    }
}
