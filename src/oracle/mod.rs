//! The Price Oracle Validator: per-symbol bounds/rate-of-change/timelock/
//! circuit-breaker gating for price updates. Typed per-entity state with
//! an ordered sequence of validation checks, single-writer via
//! `parking_lot`.

use std::collections::{HashMap, VecDeque};

use alloy::primitives::U256;
use parking_lot::RwLock;

use crate::error::OracleError;
use crate::types::PriceSnapshot;

/// Per-symbol tunables. `timelock_ms` is 0 for market-price feeds and
/// hours (converted to ms) for governance parameters.
#[derive(Debug, Clone)]
pub struct SymbolConfig {
    pub min_price: U256,
    pub max_price: U256,
    pub max_rate_change_bps: u32,
    pub max_price_age_ms: u64,
    /// A proposed change whose |Δ| exceeds `2 * circuit_breaker_threshold_bps`
    /// auto-opens the breaker.
    pub circuit_breaker_threshold_bps: u32,
    pub timelock_ms: u64,
    pub history_capacity: usize,
}

impl Default for SymbolConfig {
    fn default() -> Self {
        Self {
            min_price: U256::from(1u128),
            max_price: U256::MAX / U256::from(2u128),
            max_rate_change_bps: 2_000,
            max_price_age_ms: 10_000,
            circuit_breaker_threshold_bps: 2_500,
            timelock_ms: 0,
            history_capacity: 64,
        }
    }
}

#[derive(Debug, Clone)]
struct PendingUpdate {
    snapshot: PriceSnapshot,
    execution_time_ms: u64,
}

#[derive(Debug, Clone)]
struct OracleState {
    config: SymbolConfig,
    current: Option<PriceSnapshot>,
    pending: Option<PendingUpdate>,
    history: VecDeque<PriceSnapshot>,
    breaker_active: bool,
    breaker_reason: Option<String>,
}

impl OracleState {
    fn new(config: SymbolConfig) -> Self {
        Self {
            config,
            current: None,
            pending: None,
            history: VecDeque::new(),
            breaker_active: false,
            breaker_reason: None,
        }
    }

    fn push_history(&mut self, snapshot: PriceSnapshot) {
        if self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(snapshot);
    }
}

/// Single-writer oracle state, many-reader queries.
pub struct PriceOracleValidator {
    state: RwLock<HashMap<String, OracleState>>,
}

impl Default for PriceOracleValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl PriceOracleValidator {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_symbol(&self, symbol: &str, config: SymbolConfig) {
        self.state
            .write()
            .insert(symbol.to_string(), OracleState::new(config));
    }

    /// Queue a price update; it enters the timelock and becomes current
    /// only via a later `execute_pending` call once bounds, rate-of-
    /// change, and breaker checks pass at propose time.
    pub fn propose(
        &self,
        update: PriceSnapshot,
        _proposer: &str,
    ) -> Result<u64, OracleError> {
        let mut guard = self.state.write();
        let state = guard
            .entry(update.symbol.clone())
            .or_insert_with(|| OracleState::new(SymbolConfig::default()));

        if state.breaker_active {
            return Err(OracleError::CircuitBreakerActive(update.symbol.clone()));
        }

        if update.price_scaled_1e18 < state.config.min_price
            || update.price_scaled_1e18 > state.config.max_price
        {
            let min = state.config.min_price.to::<u128>() as f64 / 1e18;
            let max = state.config.max_price.to::<u128>() as f64 / 1e18;
            return Err(OracleError::OutOfBounds {
                symbol: update.symbol.clone(),
                min,
                max,
            });
        }

        if let Some(prev) = &state.current {
            let change_bps = rate_of_change_bps(prev.price_scaled_1e18, update.price_scaled_1e18);

            if change_bps > state.config.max_rate_change_bps {
                // Auto-trigger: a proposed change whose |Δ| exceeds 2x
                // the breaker threshold opens the breaker. Manual reset
                // only; no timed auto-recovery.
                if change_bps > state.config.circuit_breaker_threshold_bps.saturating_mul(2) {
                    state.breaker_active = true;
                    state.breaker_reason = Some(format!(
                        "proposed change of {change_bps}bps for {} exceeded 2x breaker threshold",
                        update.symbol
                    ));
                }
                return Err(OracleError::ExcessiveRateOfChange {
                    symbol: update.symbol.clone(),
                    change_bps,
                });
            }
        }

        let execution_time_ms = update.ts_ms + state.config.timelock_ms;
        state.pending = Some(PendingUpdate {
            snapshot: update,
            execution_time_ms,
        });

        Ok(execution_time_ms)
    }

    /// Commit the pending update for `symbol` once `now_ms >=
    /// execution_time`. Re-validates bounds/rate-of-change at execution
    /// time against whatever is current then (it may have changed since
    /// `propose`).
    pub fn execute_pending(&self, symbol: &str, now_ms: u64) -> Result<(), OracleError> {
        let mut guard = self.state.write();
        let state = guard
            .get_mut(symbol)
            .ok_or_else(|| OracleError::NoPendingUpdate(symbol.to_string()))?;

        if state.breaker_active {
            return Err(OracleError::CircuitBreakerActive(symbol.to_string()));
        }

        let pending = state
            .pending
            .clone()
            .ok_or_else(|| OracleError::NoPendingUpdate(symbol.to_string()))?;

        if now_ms < pending.execution_time_ms {
            return Err(OracleError::TimelockNotElapsed(symbol.to_string()));
        }

        if pending.snapshot.price_scaled_1e18 < state.config.min_price
            || pending.snapshot.price_scaled_1e18 > state.config.max_price
        {
            let min = state.config.min_price.to::<u128>() as f64 / 1e18;
            let max = state.config.max_price.to::<u128>() as f64 / 1e18;
            return Err(OracleError::OutOfBounds {
                symbol: symbol.to_string(),
                min,
                max,
            });
        }

        state.push_history(pending.snapshot.clone());
        state.current = Some(pending.snapshot);
        state.pending = None;

        Ok(())
    }

    /// The current validated price for `symbol`. Fails with `Stale` if
    /// its age exceeds `max_price_age_seconds`.
    pub fn current(&self, symbol: &str) -> Result<PriceSnapshot, OracleError> {
        self.current_at(symbol, current_millis())
    }

    /// `current` with an injected clock, for deterministic tests.
    pub fn current_at(&self, symbol: &str, now_ms: u64) -> Result<PriceSnapshot, OracleError> {
        let guard = self.state.read();
        let state = guard
            .get(symbol)
            .ok_or_else(|| OracleError::NoPrice(symbol.to_string()))?;

        let snapshot = state
            .current
            .clone()
            .ok_or_else(|| OracleError::NoPrice(symbol.to_string()))?;

        let age = now_ms.saturating_sub(snapshot.ts_ms);
        if age > state.config.max_price_age_ms {
            return Err(OracleError::Stale(symbol.to_string()));
        }

        Ok(snapshot)
    }

    pub fn is_breaker_active(&self, symbol: &str) -> bool {
        self.state
            .read()
            .get(symbol)
            .map(|s| s.breaker_active)
            .unwrap_or(false)
    }

    /// Manual-only reset; no timed auto-recovery.
    pub fn reset_breaker(&self, symbol: &str) {
        if let Some(state) = self.state.write().get_mut(symbol) {
            state.breaker_active = false;
            state.breaker_reason = None;
        }
    }

    pub fn history(&self, symbol: &str) -> Vec<PriceSnapshot> {
        self.state
            .read()
            .get(symbol)
            .map(|s| s.history.iter().cloned().collect())
            .unwrap_or_default()
    }
}

fn rate_of_change_bps(prev: U256, next: U256) -> u32 {
    if prev.is_zero() {
        return u32::MAX;
    }
    let diff = if next >= prev { next - prev } else { prev - next };
    let bps = diff
        .checked_mul(U256::from(10_000u32))
        .and_then(|v| v.checked_div(prev))
        .unwrap_or(U256::MAX);
    bps.try_into().unwrap_or(u32::MAX)
}

fn current_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(symbol: &str, price: u128, ts_ms: u64) -> PriceSnapshot {
        PriceSnapshot {
            symbol: symbol.to_string(),
            price_scaled_1e18: U256::from(price),
            source: "test".to_string(),
            ts_ms,
        }
    }

    #[test]
    fn propose_and_execute_updates_current() {
        let oracle = PriceOracleValidator::new();
        oracle.register_symbol("ETH", SymbolConfig::default());

        let exec_time = oracle
            .propose(snapshot("ETH", 3_000_000_000_000_000_000_000u128, 1_000), "test")
            .unwrap();
        oracle.execute_pending("ETH", exec_time).unwrap();

        let current = oracle.current_at("ETH", exec_time).unwrap();
        assert_eq!(current.price_scaled_1e18, U256::from(3_000_000_000_000_000_000_000u128));
    }

    #[test]
    fn crash_attempt_blocked_and_trips_breaker() {
        let oracle = PriceOracleValidator::new();
        oracle.register_symbol("ETH", SymbolConfig::default());

        let exec_time = oracle
            .propose(snapshot("ETH", 3_000_000_000_000_000_000_000u128, 1_000), "test")
            .unwrap();
        oracle.execute_pending("ETH", exec_time).unwrap();

        // Crash to 1 wei-scaled should be rejected, and because the delta
        // vastly exceeds 2x the breaker threshold, the breaker opens.
        let err = oracle
            .propose(snapshot("ETH", 1, 2_000), "attacker")
            .unwrap_err();
        assert!(matches!(err, OracleError::ExcessiveRateOfChange { .. }));
        assert!(oracle.is_breaker_active("ETH"));

        let err2 = oracle
            .propose(snapshot("ETH", 3_000_000_000_000_000_000_000u128, 3_000), "test")
            .unwrap_err();
        assert!(matches!(err2, OracleError::CircuitBreakerActive(_)));
    }

    #[test]
    fn stale_price_is_rejected() {
        let oracle = PriceOracleValidator::new();
        let mut cfg = SymbolConfig::default();
        cfg.max_price_age_ms = 1_000;
        oracle.register_symbol("ETH", cfg);

        let exec_time = oracle
            .propose(snapshot("ETH", 3_000_000_000_000_000_000_000u128, 1_000), "test")
            .unwrap();
        oracle.execute_pending("ETH", exec_time).unwrap();

        assert!(oracle.current_at("ETH", 1_500).is_ok());
        assert!(matches!(
            oracle.current_at("ETH", 5_000),
            Err(OracleError::Stale(_))
        ));
    }

    proptest::proptest! {
        /// Any update the validator lets through `propose` +
        /// `execute_pending` without tripping the breaker sits within
        /// `max_rate_change_bps` of the previous price and within
        /// `[min_price, max_price]`.
        #[test]
        fn accepted_update_stays_within_bounds_and_rate_limit(
            prev in 1_000_000u128..10_000_000_000u128,
            delta_bps in 0u32..2_000u32,
            up in proptest::prelude::any::<bool>(),
        ) {
            let oracle = PriceOracleValidator::new();
            let cfg = SymbolConfig::default();
            let max_rate = cfg.max_rate_change_bps;
            let (min_price, max_price) = (cfg.min_price, cfg.max_price);
            oracle.register_symbol("SYM", cfg);

            let exec0 = oracle.propose(snapshot("SYM", prev, 0), "test").unwrap();
            oracle.execute_pending("SYM", exec0).unwrap();

            let prev_u256 = U256::from(prev);
            let delta = prev_u256 * U256::from(delta_bps) / U256::from(10_000u32);
            let next = if up { prev_u256 + delta } else { prev_u256.saturating_sub(delta) };

            if let Ok(exec1) = oracle.propose(snapshot("SYM", next.to::<u128>(), 1_000), "test") {
                oracle.execute_pending("SYM", exec1).unwrap();
                let current = oracle.current_at("SYM", exec1).unwrap();
                proptest::prop_assert!(current.price_scaled_1e18 >= min_price);
                proptest::prop_assert!(current.price_scaled_1e18 <= max_price);
                let observed_change = rate_of_change_bps(prev_u256, current.price_scaled_1e18);
                proptest::prop_assert!(observed_change <= max_rate);
            }
        }
    }

    #[test]
    fn timelock_must_elapse_before_execution() {
        let oracle = PriceOracleValidator::new();
        let mut cfg = SymbolConfig::default();
        cfg.timelock_ms = 3_600_000;
        oracle.register_symbol("GOV_PARAM", cfg);

        let exec_time = oracle
            .propose(snapshot("GOV_PARAM", 100, 1_000), "governance")
            .unwrap();
        assert!(oracle.execute_pending("GOV_PARAM", 1_000).is_err());
        assert!(oracle.execute_pending("GOV_PARAM", exec_time).is_ok());
    }
}
