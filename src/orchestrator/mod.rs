//! The Pipeline Orchestrator: wires every stage into one bounded,
//! per-candidate pipeline in strict sequence — Profitability → Oracle →
//! Risk → Selector → Simulator → Dispatch — with a per-candidate
//! deadline and scoped resource acquisition. One struct holds every
//! stage's collaborator behind a single `run`-style entrypoint, fed by a
//! channel-driven event loop with a drop-oldest candidate intake queue.
//! `tokio::sync` primitives throughout.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use alloy::primitives::{Address, U256};
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, warn};

use crate::bundle_sim::{self, MempoolShadow, ProposedBundle, ThreatThresholds};
use crate::error::{EngineError, OrchestratorError};
use crate::flash_loan::{self, SourceAvailability};
use crate::oracle::PriceOracleValidator;
use crate::profitability::{self, ThresholdTable};
use crate::risk::{self, RiskContext, RiskGateConfig};
use crate::safety::SafetyGovernor;
use crate::types::{ArbitragePath, FlashLoanConfig, FlashLoanSource, ProfitBreakdown, RiskResult, ThreatAssessment};

/// A candidate entering the pipeline, tagged with its intake time for the
/// per-candidate deadline check.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub path: ArbitragePath,
    pub borrow_token: Address,
    pub borrow_token_symbol: &'static str,
    pub native_symbol: &'static str,
    pub input_amount: U256,
    pub amount_usd: f64,
    pub enqueued_at_ms: u64,
}

/// Drop-oldest bounded intake queue for raw candidates arriving from
/// multiple concurrent Path Finder searches. Non-critical: a dropped
/// candidate simply never gets a chance, it's never an error state. Once
/// a candidate is pulled off this queue and enters `run_pipeline`, the
/// per-candidate stage sequence is never truncated — only a deadline
/// expiry short-circuits it.
pub struct CandidateQueue {
    capacity: usize,
    items: Mutex<VecDeque<Candidate>>,
    notify: Notify,
    dropped: AtomicU64,
}

impl CandidateQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Push a candidate, evicting the oldest queued one if at capacity.
    pub fn push(&self, candidate: Candidate) {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            items.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        items.push_back(candidate);
        drop(items);
        self.notify.notify_one();
    }

    pub async fn pop(&self) -> Candidate {
        loop {
            if let Some(c) = self.items.lock().pop_front() {
                return c;
            }
            self.notify.notified().await;
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }
}

/// Scoped handles to externally-limited resources (RPC connections,
/// flash-loan execution slots, persistence file writers). Acquired for
/// the span of one candidate's pipeline run and released on drop — RAII
/// rather than a manual release call, so an early-return via `?` can't
/// leak a permit.
pub struct PipelineResources {
    pub rpc: Semaphore,
    pub flash_loan: Semaphore,
    pub file_io: Semaphore,
}

impl PipelineResources {
    pub fn new(rpc_slots: usize, flash_loan_slots: usize, file_io_slots: usize) -> Self {
        Self {
            rpc: Semaphore::new(rpc_slots),
            flash_loan: Semaphore::new(flash_loan_slots),
            file_io: Semaphore::new(file_io_slots),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    pub candidate_deadline_ms: u64,
}

/// Everything a candidate run needs from the rest of the engine, borrowed
/// for the duration of one call to `run_pipeline`.
pub struct PipelineContext<'a> {
    pub oracle: &'a PriceOracleValidator,
    pub threshold_table: &'a ThresholdTable,
    pub risk_config: &'a RiskGateConfig,
    pub flash_loan_availability: &'a SourceAvailability,
    pub hybrid_threshold_usd: f64,
    pub chain_id: u64,
    pub mempool_shadow: &'a MempoolShadow,
    pub threat_thresholds: &'a ThreatThresholds,
    pub safety: &'a SafetyGovernor,
    pub gas_price_wei: U256,
    pub resources: &'a PipelineResources,
    pub config: &'a OrchestratorConfig,
}

/// The terminal outcome of running one candidate through every stage.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub profit: ProfitBreakdown,
    pub risk: RiskResult,
    pub flash_loan: FlashLoanConfig,
    pub threat: ThreatAssessment,
    pub dispatched: bool,
}

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn check_deadline(candidate: &Candidate, cfg: &OrchestratorConfig) -> Result<(), EngineError> {
    let elapsed = now_ms().saturating_sub(candidate.enqueued_at_ms);
    if elapsed > cfg.candidate_deadline_ms {
        return Err(OrchestratorError::DeadlineExceeded(elapsed).into());
    }
    Ok(())
}

/// Run one candidate through the strict Profitability → Oracle → Risk →
/// Selector → Simulator → Dispatch sequence. `dispatch_fn` performs the
/// final submission (public or private) and is only invoked once every
/// earlier stage, including the Safety Governor's `can_execute` gate,
/// has passed — the Safety Governor can still veto even when every other
/// stage is green.
pub async fn run_pipeline<F>(
    candidate: Candidate,
    ctx: &PipelineContext<'_>,
    dispatch_fn: F,
) -> Result<PipelineOutcome, EngineError>
where
    F: FnOnce(&ArbitragePath, &FlashLoanConfig, &ThreatAssessment) -> bool,
{
    // --- Stage 1: Profitability (provisional) -------------------------
    // A full flash-loan fee isn't known until Selector runs, so the first
    // pass assumes the cheapest possible source (0 bps) purely to reject
    // candidates that can't clear even an optimistic bar. The real gate
    // is the post-Selector recomputation below.
    check_deadline(&candidate, ctx.config)?;
    let optimistic_flash = FlashLoanConfig {
        source: FlashLoanSource::Balancer,
        fee_bps: 0,
        pool_fee_bps: None,
    };
    let provisional = profitability::calculate_detailed(
        &candidate.path,
        candidate.borrow_token_symbol,
        candidate.native_symbol,
        candidate.input_amount,
        optimistic_flash,
        ctx.gas_price_wei,
        ctx.oracle,
        ctx.threshold_table,
        candidate.borrow_token,
        candidate.path.end_token().unwrap_or(candidate.borrow_token),
    )?;
    if !provisional.profitable {
        debug!(net = provisional.net, "candidate fails even the optimistic profitability pass");
        return Err(OrchestratorError::CandidateRejected("profitability").into());
    }

    // --- Stage 2: Oracle --------------------------------------------
    check_deadline(&candidate, ctx.config)?;
    let _ = ctx.oracle.current(candidate.native_symbol);

    // --- Stage 3: Risk & Ethics Gate ----------------------------------
    check_deadline(&candidate, ctx.config)?;
    let risk_ctx = RiskContext {
        capital_at_risk_usd: candidate.amount_usd,
        baseline_capital_usd: candidate.amount_usd.max(1.0) * 10.0,
        ethical_alignment: 0.95,
        emergence_confidence: candidate.path.confidence_score.clamp(0.0, 2.0) / 2.0,
        historical_success_rate: 0.8,
        novelty: 0.2,
        reversibility: 0.9,
    };
    let risk = risk::evaluate(&risk_ctx, ctx.risk_config)?;
    if !risk.should_proceed {
        return Err(OrchestratorError::CandidateRejected("risk").into());
    }

    // --- Stage 4: Flash-Loan Selector ---------------------------------
    check_deadline(&candidate, ctx.config)?;
    let _rpc_permit = ctx
        .resources
        .rpc
        .acquire()
        .await
        .map_err(|_| EngineError::Orchestrator(OrchestratorError::ChannelClosed))?;
    let flash_loan = flash_loan::select(
        candidate.input_amount,
        ctx.chain_id,
        candidate.amount_usd,
        ctx.hybrid_threshold_usd,
        ctx.flash_loan_availability,
    )?;
    drop(_rpc_permit);

    // Recompute profitability with the real flash-loan fee now known.
    let profit = profitability::calculate_detailed(
        &candidate.path,
        candidate.borrow_token_symbol,
        candidate.native_symbol,
        candidate.input_amount,
        flash_loan,
        ctx.gas_price_wei,
        ctx.oracle,
        ctx.threshold_table,
        candidate.borrow_token,
        candidate.path.end_token().unwrap_or(candidate.borrow_token),
    )?;
    if !profit.meets_threshold {
        return Err(OrchestratorError::CandidateRejected("profitability-post-selection").into());
    }

    // --- Stage 5: Bundle Simulator (pre-crime) ------------------------
    check_deadline(&candidate, ctx.config)?;
    let _flash_permit = ctx
        .resources
        .flash_loan
        .acquire()
        .await
        .map_err(|_| EngineError::Orchestrator(OrchestratorError::ChannelClosed))?;
    let bundle = ProposedBundle {
        target_contract: candidate.path.hops.first().map(|h| h.pool_id).unwrap_or_default(),
        gas_price: ctx.gas_price_wei,
        gas_limit: candidate.path.gas_estimate,
        value_usd: candidate.amount_usd,
    };
    let threat = bundle_sim::simulate(&bundle, ctx.mempool_shadow, ctx.threat_thresholds, profit.net)?;
    drop(_flash_permit);

    if matches!(threat.recommendation, crate::types::ThreatRecommendation::Abort) {
        return Err(OrchestratorError::CandidateRejected("bundle-simulator").into());
    }

    // --- Stage 6: Dispatch ---------------------------------------------
    check_deadline(&candidate, ctx.config)?;
    let source_key = format!("{:?}", candidate.borrow_token);
    let safety_clear = ctx.safety.can_execute(&source_key, now_ms()).is_ok();
    let dispatched = if safety_clear {
        dispatch_fn(&candidate.path, &flash_loan, &threat)
    } else {
        warn!("safety governor denied dispatch for an otherwise-clear candidate");
        false
    };

    Ok(PipelineOutcome {
        profit,
        risk,
        flash_loan,
        threat,
        dispatched,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_oldest_queue_evicts_front_past_capacity() {
        let queue = CandidateQueue::new(2);
        let base = Candidate {
            path: ArbitragePath {
                hops: vec![],
                gross_profit: U256::ZERO,
                total_fees_bps: 0,
                gas_estimate: 0,
                slippage_impact_bps: 0,
                flash_loan_provider: None,
                confidence_score: 1.0,
            },
            borrow_token: Address::ZERO,
            borrow_token_symbol: "WETH",
            native_symbol: "WETH",
            input_amount: U256::from(1u64),
            amount_usd: 1.0,
            enqueued_at_ms: 0,
        };
        for _ in 0..5 {
            queue.push(base.clone());
        }
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped_count(), 3);
    }
}
