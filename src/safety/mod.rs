//! The Safety Governor: Circuit Breaker, latched Emergency Stop, and a
//! sliding-window Rate Limiter, composed behind one `can_execute()` gate
//! every stage must query before mutating external state. Circuit-
//! breaker/emergency-stop logic is expressed as explicit state machines
//! built on threshold-driven early-exit checks (gas-estimate sanity
//! bounds, profit-vs-estimate divergence); the rate limiter follows a
//! sliding-window pattern. `parking_lot` backs the atomic state.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::error::SafetyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Armed,
    Tripped,
    Cooldown,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerState {
    pub active: bool,
    pub trigger_reason: Option<String>,
    pub opened_at_ms: u64,
    pub cooldown_ms: u64,
    pub consecutive_failures: u32,
    pub cumulative_loss: i128,
}

pub struct CircuitBreaker {
    inner: Mutex<Inner>,
}

struct Inner {
    state: BreakerState,
    trigger_reason: Option<String>,
    opened_at_ms: u64,
    consecutive_failures: u32,
    cumulative_loss: i128,
    max_consecutive_failures: u32,
    max_cumulative_loss: i128,
    cooldown_ms: u64,
}

impl CircuitBreaker {
    pub fn new(max_consecutive_failures: u32, max_cumulative_loss: i128, cooldown_ms: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: BreakerState::Armed,
                trigger_reason: None,
                opened_at_ms: 0,
                consecutive_failures: 0,
                cumulative_loss: 0,
                max_consecutive_failures,
                max_cumulative_loss,
                cooldown_ms,
            }),
        }
    }

    /// Record a trade outcome; `profit` is negative for a loss. Trips to
    /// `Tripped` if the consecutive-failure count or cumulative loss
    /// crosses its configured bound.
    pub fn on_trade(&self, profit: i128, now_ms: u64) {
        let mut inner = self.inner.lock();
        self.advance_cooldown(&mut inner, now_ms);

        if profit < 0 {
            inner.consecutive_failures += 1;
            inner.cumulative_loss += profit;
        } else {
            inner.consecutive_failures = 0;
        }

        if inner.state == BreakerState::Armed {
            let failures_exceeded = inner.consecutive_failures >= inner.max_consecutive_failures;
            let loss_exceeded = inner.cumulative_loss <= -inner.max_cumulative_loss;
            if failures_exceeded || loss_exceeded {
                inner.state = BreakerState::Tripped;
                inner.opened_at_ms = now_ms;
                inner.trigger_reason = Some(if loss_exceeded {
                    format!("cumulative loss {} exceeded max {}", inner.cumulative_loss, inner.max_cumulative_loss)
                } else {
                    format!(
                        "{} consecutive failures exceeded max {}",
                        inner.consecutive_failures, inner.max_consecutive_failures
                    )
                });
            }
        }
    }

    fn advance_cooldown(&self, inner: &mut Inner, now_ms: u64) {
        if inner.state == BreakerState::Tripped
            && now_ms.saturating_sub(inner.opened_at_ms) >= inner.cooldown_ms
        {
            inner.state = BreakerState::Cooldown;
        }
    }

    /// Manual reset, only permitted from `Cooldown`.
    pub fn reset(&self, now_ms: u64) -> Result<(), SafetyError> {
        let mut inner = self.inner.lock();
        self.advance_cooldown(&mut inner, now_ms);
        if inner.state != BreakerState::Cooldown {
            return Err(SafetyError::CircuitBreakerTripped);
        }
        inner.state = BreakerState::Armed;
        inner.trigger_reason = None;
        inner.consecutive_failures = 0;
        inner.cumulative_loss = 0;
        Ok(())
    }

    pub fn state(&self, now_ms: u64) -> BreakerState {
        let mut inner = self.inner.lock();
        self.advance_cooldown(&mut inner, now_ms);
        inner.state
    }

    pub fn snapshot(&self, now_ms: u64) -> CircuitBreakerState {
        let mut inner = self.inner.lock();
        self.advance_cooldown(&mut inner, now_ms);
        CircuitBreakerState {
            active: inner.state == BreakerState::Tripped,
            trigger_reason: inner.trigger_reason.clone(),
            opened_at_ms: inner.opened_at_ms,
            cooldown_ms: inner.cooldown_ms,
            consecutive_failures: inner.consecutive_failures,
            cumulative_loss: inner.cumulative_loss,
        }
    }
}

/// Latched emergency stop: once tripped, stays tripped until an operator
/// explicitly resets it. No automatic recovery path exists.
pub struct EmergencyStop {
    inner: Mutex<EmergencyInner>,
}

struct EmergencyInner {
    latched: bool,
    reason: Option<String>,
    baseline_capital: f64,
    max_capital_loss_pct: f64,
    max_consecutive_errors: u32,
    consecutive_errors: u32,
}

impl EmergencyStop {
    pub fn new(baseline_capital: f64, max_capital_loss_pct: f64, max_consecutive_errors: u32) -> Self {
        Self {
            inner: Mutex::new(EmergencyInner {
                latched: false,
                reason: None,
                baseline_capital,
                max_capital_loss_pct,
                max_consecutive_errors,
                consecutive_errors: 0,
            }),
        }
    }

    pub fn observe_capital(&self, current_capital: f64) {
        let mut inner = self.inner.lock();
        if inner.latched {
            return;
        }
        let floor = inner.baseline_capital * (1.0 - inner.max_capital_loss_pct);
        if current_capital < floor {
            inner.latched = true;
            inner.reason = Some(format!(
                "capital {current_capital} fell below floor {floor} ({}% of baseline {})",
                (1.0 - inner.max_capital_loss_pct) * 100.0,
                inner.baseline_capital
            ));
        }
    }

    pub fn observe_error(&self) {
        let mut inner = self.inner.lock();
        if inner.latched {
            return;
        }
        inner.consecutive_errors += 1;
        if inner.consecutive_errors >= inner.max_consecutive_errors {
            inner.latched = true;
            inner.reason = Some(format!(
                "{} consecutive errors reached max {}",
                inner.consecutive_errors, inner.max_consecutive_errors
            ));
        }
    }

    pub fn observe_success(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_errors = 0;
    }

    pub fn is_latched(&self) -> bool {
        self.inner.lock().latched
    }

    /// Explicit operator reset; the only way out of a latched state.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.latched = false;
        inner.reason = None;
        inner.consecutive_errors = 0;
    }
}

/// Sliding-window rate limiter, one counter per address/source key.
pub struct RateLimiter {
    window_ms: u64,
    max_requests: u32,
    windows: Mutex<HashMap<String, VecDeque<u64>>>,
}

impl RateLimiter {
    pub fn new(window_ms: u64, max_requests: u32) -> Self {
        Self {
            window_ms,
            max_requests,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Records an attempt for `key` at `now_ms`; returns an error if the
    /// sliding window's cap is already exceeded (the attempt itself is
    /// still recorded so sustained abuse keeps tripping the limiter).
    pub fn check(&self, key: &str, now_ms: u64) -> Result<(), SafetyError> {
        let mut windows = self.windows.lock();
        let entry = windows.entry(key.to_string()).or_default();
        while let Some(&oldest) = entry.front() {
            if now_ms.saturating_sub(oldest) > self.window_ms {
                entry.pop_front();
            } else {
                break;
            }
        }
        entry.push_back(now_ms);
        if entry.len() as u32 > self.max_requests {
            return Err(SafetyError::RateLimitExceeded(key.to_string()));
        }
        Ok(())
    }
}

/// Composes the three state machines behind one gate. Every pipeline
/// stage queries this before mutating external state.
pub struct SafetyGovernor {
    pub breaker: CircuitBreaker,
    pub emergency_stop: EmergencyStop,
    pub rate_limiter: RateLimiter,
}

impl SafetyGovernor {
    pub fn new(
        breaker: CircuitBreaker,
        emergency_stop: EmergencyStop,
        rate_limiter: RateLimiter,
    ) -> Self {
        Self {
            breaker,
            emergency_stop,
            rate_limiter,
        }
    }

    pub fn can_execute(&self, source_key: &str, now_ms: u64) -> Result<(), SafetyError> {
        if self.emergency_stop.is_latched() {
            return Err(SafetyError::EmergencyStopLatched);
        }
        if self.breaker.state(now_ms) == BreakerState::Tripped {
            return Err(SafetyError::CircuitBreakerTripped);
        }
        self.rate_limiter.check(source_key, now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaker_trips_after_consecutive_failures() {
        let breaker = CircuitBreaker::new(3, 1_000_000, 1_000);
        breaker.on_trade(-1, 0);
        breaker.on_trade(-1, 0);
        assert_eq!(breaker.state(0), BreakerState::Armed);
        breaker.on_trade(-1, 0);
        assert_eq!(breaker.state(0), BreakerState::Tripped);
    }

    #[test]
    fn breaker_cools_down_then_resets() {
        let breaker = CircuitBreaker::new(1, 1_000_000, 1_000);
        breaker.on_trade(-1, 0);
        assert_eq!(breaker.state(0), BreakerState::Tripped);
        assert_eq!(breaker.state(1_500), BreakerState::Cooldown);
        breaker.reset(1_500).unwrap();
        assert_eq!(breaker.state(1_500), BreakerState::Armed);
    }

    #[test]
    fn reset_rejected_outside_cooldown() {
        let breaker = CircuitBreaker::new(1, 1_000_000, 1_000);
        breaker.on_trade(-1, 0);
        assert!(breaker.reset(0).is_err());
    }

    #[test]
    fn emergency_stop_latches_on_capital_drawdown() {
        // Baseline 10 ETH, drop to 9.4 ETH (6% loss) with a 5% max-loss
        // config should latch.
        let stop = EmergencyStop::new(10.0, 0.05, 5);
        stop.observe_capital(9.4);
        assert!(stop.is_latched());
        stop.reset();
        assert!(!stop.is_latched());
    }

    #[test]
    fn emergency_stop_latches_on_consecutive_errors() {
        let stop = EmergencyStop::new(10.0, 0.5, 3);
        stop.observe_error();
        stop.observe_error();
        assert!(!stop.is_latched());
        stop.observe_error();
        assert!(stop.is_latched());
    }

    #[test]
    fn circuit_breaker_open_denies_every_can_execute_call() {
        let gov = SafetyGovernor::new(
            CircuitBreaker::new(1, 1_000_000, 60_000),
            EmergencyStop::new(10.0, 0.1, 5),
            RateLimiter::new(1_000, 100),
        );
        gov.breaker.on_trade(-1, 0);
        assert!(matches!(
            gov.can_execute("addr1", 0),
            Err(SafetyError::CircuitBreakerTripped)
        ));
        assert!(matches!(
            gov.can_execute("addr2", 0),
            Err(SafetyError::CircuitBreakerTripped)
        ));
    }

    #[test]
    fn rate_limiter_rejects_past_window_cap() {
        let limiter = RateLimiter::new(1_000, 2);
        assert!(limiter.check("a", 0).is_ok());
        assert!(limiter.check("a", 10).is_ok());
        assert!(limiter.check("a", 20).is_err());
        assert!(limiter.check("a", 2_000).is_ok());
    }
}
