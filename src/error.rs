//! Error taxonomy. One `thiserror` enum per component, composed into a
//! single top-level error for call sites that cross component boundaries.

use alloy::primitives::Address;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("pool {0} failed price validity check")]
    InvalidPrice(Address),
    #[error("pool {0} round-trip price deviation exceeds tolerance")]
    RoundTripDeviation(Address),
    #[error("token {0} has no graph node")]
    UnknownToken(Address),
    #[error("feed for pool {0} is stale (age {age_ms}ms)")]
    StaleFeed { pool: Address, age_ms: u64 },
    #[error("partial block update failed, rolled back: {0}")]
    PartialUpdate(String),
}

#[derive(Debug, Error)]
pub enum PathFinderError {
    #[error("start token {0} is not present in the graph")]
    UnknownStartToken(Address),
    #[error("max_hops must be >= 2, got {0}")]
    InvalidMaxHops(usize),
}

#[derive(Debug, Error)]
pub enum ProfitabilityError {
    #[error("arithmetic overflow while computing profit for candidate")]
    Overflow,
    #[error("no profit threshold configured for pair ({0}, {1}) and no default set")]
    MissingThreshold(Address, Address),
    #[error("failed to convert gas cost into borrow-token units: {0}")]
    GasConversionFailed(String),
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("symbol {0} has no recorded price")]
    NoPrice(String),
    #[error("proposed price for {symbol} is out of bounds [{min}, {max}]")]
    OutOfBounds {
        symbol: String,
        min: f64,
        max: f64,
    },
    #[error("proposed price for {symbol} changed by {change_bps}bps, exceeding max rate of change")]
    ExcessiveRateOfChange { symbol: String, change_bps: u32 },
    #[error("price for {0} is stale")]
    Stale(String),
    #[error("circuit breaker active for {0}, update rejected")]
    CircuitBreakerActive(String),
    #[error("no pending update queued for {0}")]
    NoPendingUpdate(String),
    #[error("timelock has not elapsed for pending update to {0}")]
    TimelockNotElapsed(String),
}

#[derive(Debug, Error)]
pub enum FlashLoanError {
    #[error("no flash-loan source satisfies the requested amount and chain")]
    NoSourceAvailable,
}

#[derive(Debug, Error)]
pub enum BundleSimError {
    #[error("mempool shadow is not initialized")]
    ShadowUninitialized,
}

#[derive(Debug, Error)]
pub enum RiskError {
    #[error("risk category weights must sum to 1.0, got {0}")]
    InvalidWeights(f64),
}

#[derive(Debug, Error)]
pub enum SafetyError {
    #[error("circuit breaker is tripped, execution denied")]
    CircuitBreakerTripped,
    #[error("emergency stop is latched, execution denied")]
    EmergencyStopLatched,
    #[error("rate limit exceeded for {0}")]
    RateLimitExceeded(String),
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("candidate exceeded its processing deadline ({0}ms elapsed)")]
    DeadlineExceeded(u64),
    #[error("stage channel closed unexpectedly")]
    ChannelClosed,
    #[error("candidate rejected at the {0} stage")]
    CandidateRejected(&'static str),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dry run mode: dispatch suppressed")]
    DryRun,
    #[error("provider error while submitting transaction: {0}")]
    Provider(String),
    #[error("private bundle relay rejected submission: {0}")]
    RelayRejected(String),
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("upstream connection failed: {0}")]
    Connection(String),
    #[error("duplicate event {0} ignored")]
    Duplicate(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingEnv(String),
    #[error("failed to parse environment variable {0}: {1}")]
    ParseEnv(String, String),
    #[error("config file contains unknown key: {0}")]
    UnknownKey(String),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to open persistence file {0}: {1}")]
    Open(String, String),
    #[error("failed to write record: {0}")]
    Write(String),
}

/// Top-level error composing every component error. Carries a classified
/// code plus a one-sentence cause; no stack traces leave this boundary
/// (those belong in tracing spans).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("graph: {0}")]
    Graph(#[from] GraphError),
    #[error("path finder: {0}")]
    PathFinder(#[from] PathFinderError),
    #[error("profitability: {0}")]
    Profitability(#[from] ProfitabilityError),
    #[error("oracle: {0}")]
    Oracle(#[from] OracleError),
    #[error("flash loan: {0}")]
    FlashLoan(#[from] FlashLoanError),
    #[error("bundle sim: {0}")]
    BundleSim(#[from] BundleSimError),
    #[error("risk: {0}")]
    Risk(#[from] RiskError),
    #[error("safety: {0}")]
    Safety(#[from] SafetyError),
    #[error("orchestrator: {0}")]
    Orchestrator(#[from] OrchestratorError),
    #[error("dispatch: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("feed: {0}")]
    Feed(#[from] FeedError),
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("persistence: {0}")]
    Persistence(#[from] PersistenceError),
}

impl EngineError {
    /// A short, stable classification code for metrics/log fields.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Graph(_) => "graph",
            EngineError::PathFinder(_) => "path_finder",
            EngineError::Profitability(_) => "profitability",
            EngineError::Oracle(_) => "oracle",
            EngineError::FlashLoan(_) => "flash_loan",
            EngineError::BundleSim(_) => "bundle_sim",
            EngineError::Risk(_) => "risk",
            EngineError::Safety(_) => "safety",
            EngineError::Orchestrator(_) => "orchestrator",
            EngineError::Dispatch(_) => "dispatch",
            EngineError::Feed(_) => "feed",
            EngineError::Config(_) => "config",
            EngineError::Persistence(_) => "persistence",
        }
    }
}
