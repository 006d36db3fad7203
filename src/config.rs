//! Engine configuration: environment-driven at startup, with a strict
//! unknown-key-rejecting on-disk overlay for the parameters operators tune
//! most often.

use std::collections::HashSet;
use std::env;

use alloy::primitives::{address, Address, U256};
use serde::Deserialize;

use crate::error::ConfigError;

/// Addresses the engine treats as base tokens when seeding cycle search
/// and as the canonical registry for symbol/decimals lookups.
pub mod tokens {
    use super::*;

    pub const WMON: Address = address!("760AfE86e5de5fa0Ae4Cc9b1A4c4FA3A2E3b7E5d");
    pub const USDC: Address = address!("F817257fed379853cDe0fa4F97AB987181B1E5Ea");
    pub const USDT: Address = address!("a09A13A5D4f4B21FCE9a2cCfF4D8d8C5b3FeA9E5");
    pub const WETH: Address = address!("B5a30b0FDc5EA94A52fDc42e3E9760Cb8449Fb37");

    pub const BASE_TOKENS: [Address; 4] = [WMON, USDC, USDT, WETH];

    pub fn symbol(addr: Address) -> &'static str {
        match addr {
            WMON => "WMON",
            USDC => "USDC",
            USDT => "USDT",
            WETH => "WETH",
            _ => "UNKNOWN",
        }
    }

    pub fn decimals(addr: Address) -> u8 {
        match addr {
            WMON | WETH => 18,
            USDC | USDT => 6,
            _ => 18,
        }
    }

    /// Reverse of `symbol`, for parsing symbol-keyed config entries
    /// (e.g. `PROFIT_THRESHOLDS`) back into addresses.
    pub fn by_symbol(symbol: &str) -> Option<Address> {
        match symbol {
            "WMON" => Some(WMON),
            "USDC" => Some(USDC),
            "USDT" => Some(USDT),
            "WETH" => Some(WETH),
            _ => None,
        }
    }
}

/// DEX contract addresses consulted by the Liquidity Graph's feed
/// ingestion (`dex::batch_client`) when discovering pools to feed
/// `update_pool`. Pool discovery is treated as a narrow external-feed
/// concern, not something to parameterize per run.
pub mod contracts {
    use super::*;

    pub mod uniswap_v3 {
        use super::*;

        pub const FACTORY: Address = address!("1F98431c8aD98523631AE4a59f267346ea31F984");
        pub const SWAP_ROUTER: Address = address!("E592427A0AEce92De3Edee1F18E0157C05861564");
        pub const SWAP_ROUTER_02: Address = address!("68b3465833fb72A70ecDF485E0e4C7bD8665Fc45");
        pub const QUOTER_V2: Address = address!("61fFE014bA17989E743c5F6cB21bF9697530B21e");
        pub const NFT_POSITION_MANAGER: Address =
            address!("C36442b4a4522E871399CD717aBDD847Ab11FE88");

        pub const FEE_TIERS: [u32; 4] = [100, 500, 3000, 10000];
    }

    pub mod pancakeswap_v3 {
        use super::*;

        pub const FACTORY: Address = address!("0BFbCF9fa4f9C56B0F40a671Ad40E0805A091865");
        pub const SWAP_ROUTER: Address = address!("13f4EA83D0bd40E75C8222255bc855a974568Dd4");
        pub const QUOTER_V2: Address = address!("B048Bbc1Ee6b733FFfCFb9e9CeF7375518e25997");

        pub const FEE_TIERS: [u32; 4] = [100, 500, 2500, 10000];
    }

    pub mod lfj {
        use super::*;

        pub const LB_FACTORY: Address = address!("8e42f2F4101563bF679975178e880FD87d3eFd4e");
        pub const LB_ROUTER: Address = address!("b4315e873dBcf96Ffd0acd8EA43f689D8c20fB30");
        pub const LB_QUOTER: Address = address!("64b57F4249aA99a812212cee7DAEFEDC93b02E14");
    }

    pub mod uniswap_v4 {
        use super::*;

        pub const POOL_MANAGER: Address = address!("360E68faCcca8cA495c1B759Fd9EEe466db9FB32");
        pub const STATE_VIEW: Address = address!("86e8631A016F9068C3f085fAF484Ee3F5fDee707");

        pub const COMMON_FEE_TIERS: [u32; 4] = [100, 500, 3000, 10000];
        pub const COMMON_TICK_SPACINGS: [i32; 4] = [1, 10, 60, 200];
        pub const DYNAMIC_FEE_FLAG: u32 = 0x800000;
    }
}

pub mod thresholds {
    use alloy::primitives::U256;

    /// Round-trip (price_0_to_1 * price_1_to_0) must stay within this
    /// fraction of 1.0 or the pool is dropped from the graph as
    /// internally inconsistent.
    pub const MAX_ROUND_TRIP_DEVIATION: f64 = 0.02;
    pub const MIN_EDGE_PRICE: f64 = 1e-10;
    pub const MAX_EDGE_PRICE: f64 = 1e10;

    /// Minimum pool liquidity, normalized to 18 decimals, for a
    /// discovered pool to be considered during graph ingestion (1000
    /// units at 18 decimals), applied across every DEX client's
    /// discovery filter.
    /// = 1000 * 10^18, expressed as raw limbs since `U256` arithmetic
    /// isn't const-evaluable.
    pub const MIN_NORMALIZED_LIQUIDITY: U256 =
        U256::from_limbs([3_875_820_019_684_212_736, 54, 0, 0]);

    /// Scale a raw on-chain reserve amount with `decimals` decimals up
    /// (or down) to the 18-decimal unit every DEX client normalizes to,
    /// so liquidity is comparable across tokens with different decimal
    /// counts.
    pub fn normalize_to_18_decimals(amount: U256, decimals: u8) -> U256 {
        if decimals == 18 {
            return amount;
        }
        if decimals < 18 {
            let factor = U256::from(10u128).pow(U256::from((18 - decimals) as u64));
            amount.saturating_mul(factor)
        } else {
            let factor = U256::from(10u128).pow(U256::from((decimals - 18) as u64));
            amount.checked_div(factor).unwrap_or(U256::ZERO)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Top-level engine configuration. Loaded from the environment
/// (`from_env`) with an optional YAML overlay (`apply_file_overlay`) that
/// rejects unknown keys outright rather than silently ignoring typos.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub rpc_url: String,
    pub ws_url: Option<String>,
    pub chain_id: u64,
    pub dry_run: bool,
    pub log_format: LogFormat,

    // Path Finder
    pub max_path_len: usize,
    pub min_liquidity_usd: f64,

    // Profitability Engine
    pub min_arbitrage_profit_usd: f64,
    pub default_profit_threshold_bps: u32,
    pub safety_margin_bps: u32,

    // Price Oracle Validator
    pub oracle_max_rate_change_bps: u32,
    pub oracle_timelock_seconds: u64,
    pub oracle_stale_after_ms: u64,
    pub oracle_min_price_usd: f64,
    pub oracle_max_price_usd: f64,

    // Safety Governor
    pub circuit_breaker_trip_threshold_bps: u32,
    pub circuit_breaker_cooldown_seconds: u64,
    pub emergency_stop_max_consecutive_errors: u32,
    pub rate_limit_window_seconds: u64,
    pub rate_limit_max_requests: u32,

    // Pipeline Orchestrator
    pub candidate_deadline_ms: u64,
    pub stage_channel_capacity: usize,

    // Execution Dispatch
    pub private_bundle_enabled: bool,
    pub private_bundle_refund_bps: u32,

    // Bundle Simulator
    pub mempool_shadow_capacity: usize,

    /// Per-pair net-profit threshold overrides, in USD, layered on top of
    /// `min_arbitrage_profit_usd`. Populated from `PROFIT_THRESHOLDS`
    /// (env) or the `profit_thresholds` overlay key: comma-separated
    /// `SYMBOL:SYMBOL:usd` triples, e.g. `"WETH:USDC:50,WMON:USDT:10"`.
    pub profit_threshold_overrides: Vec<(Address, Address, f64)>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            ws_url: None,
            chain_id: 1,
            dry_run: true,
            log_format: LogFormat::Pretty,
            max_path_len: 4,
            min_liquidity_usd: 1_000.0,
            min_arbitrage_profit_usd: 5.0,
            default_profit_threshold_bps: 30,
            safety_margin_bps: 10,
            oracle_max_rate_change_bps: 2_000,
            oracle_timelock_seconds: 0,
            oracle_stale_after_ms: 10_000,
            oracle_min_price_usd: 1e-9,
            oracle_max_price_usd: 1_000_000.0,
            circuit_breaker_trip_threshold_bps: 500,
            circuit_breaker_cooldown_seconds: 60,
            emergency_stop_max_consecutive_errors: 5,
            rate_limit_window_seconds: 60,
            rate_limit_max_requests: 120,
            candidate_deadline_ms: 50,
            stage_channel_capacity: 256,
            private_bundle_enabled: false,
            private_bundle_refund_bps: 9_000,
            mempool_shadow_capacity: 100,
            profit_threshold_overrides: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset. `.env` is read first via `dotenvy`
    /// if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut cfg = EngineConfig::default();

        if let Ok(v) = env::var("RPC_URL") {
            cfg.rpc_url = v;
        }
        cfg.ws_url = env::var("WS_URL").ok();

        cfg.chain_id = parse_env_or("CHAIN_ID", cfg.chain_id)?;
        cfg.dry_run = parse_env_or("DRY_RUN", cfg.dry_run)?;
        cfg.max_path_len = parse_env_or("MAX_PATH_LEN", cfg.max_path_len)?;
        cfg.min_liquidity_usd = parse_env_or("MIN_LIQUIDITY_USD", cfg.min_liquidity_usd)?;
        cfg.min_arbitrage_profit_usd =
            parse_env_or("MIN_ARBITRAGE_PROFIT_USD", cfg.min_arbitrage_profit_usd)?;
        cfg.default_profit_threshold_bps = parse_env_or(
            "DEFAULT_PROFIT_THRESHOLD_BPS",
            cfg.default_profit_threshold_bps,
        )?;
        cfg.safety_margin_bps = parse_env_or("SAFETY_MARGIN_BPS", cfg.safety_margin_bps)?;
        cfg.oracle_max_rate_change_bps = parse_env_or(
            "ORACLE_MAX_RATE_CHANGE_BPS",
            cfg.oracle_max_rate_change_bps,
        )?;
        cfg.oracle_timelock_seconds =
            parse_env_or("ORACLE_TIMELOCK_SECONDS", cfg.oracle_timelock_seconds)?;
        cfg.oracle_stale_after_ms =
            parse_env_or("ORACLE_STALE_AFTER_MS", cfg.oracle_stale_after_ms)?;
        cfg.oracle_min_price_usd =
            parse_env_or("ORACLE_MIN_PRICE_USD", cfg.oracle_min_price_usd)?;
        cfg.oracle_max_price_usd =
            parse_env_or("ORACLE_MAX_PRICE_USD", cfg.oracle_max_price_usd)?;
        cfg.circuit_breaker_trip_threshold_bps = parse_env_or(
            "CIRCUIT_BREAKER_TRIP_THRESHOLD_BPS",
            cfg.circuit_breaker_trip_threshold_bps,
        )?;
        cfg.circuit_breaker_cooldown_seconds = parse_env_or(
            "CIRCUIT_BREAKER_COOLDOWN_SECONDS",
            cfg.circuit_breaker_cooldown_seconds,
        )?;
        cfg.emergency_stop_max_consecutive_errors = parse_env_or(
            "EMERGENCY_STOP_MAX_CONSECUTIVE_ERRORS",
            cfg.emergency_stop_max_consecutive_errors,
        )?;
        cfg.rate_limit_window_seconds =
            parse_env_or("RATE_LIMIT_WINDOW_SECONDS", cfg.rate_limit_window_seconds)?;
        cfg.rate_limit_max_requests =
            parse_env_or("RATE_LIMIT_MAX_REQUESTS", cfg.rate_limit_max_requests)?;
        cfg.candidate_deadline_ms =
            parse_env_or("CANDIDATE_DEADLINE_MS", cfg.candidate_deadline_ms)?;
        cfg.stage_channel_capacity =
            parse_env_or("STAGE_CHANNEL_CAPACITY", cfg.stage_channel_capacity)?;
        cfg.private_bundle_enabled =
            parse_env_or("PRIVATE_BUNDLE_ENABLED", cfg.private_bundle_enabled)?;
        cfg.private_bundle_refund_bps =
            parse_env_or("PRIVATE_BUNDLE_REFUND_BPS", cfg.private_bundle_refund_bps)?;
        cfg.mempool_shadow_capacity =
            parse_env_or("MEMPOOL_SHADOW_CAPACITY", cfg.mempool_shadow_capacity)?;
        if let Ok(v) = env::var("PROFIT_THRESHOLDS") {
            cfg.profit_threshold_overrides = parse_profit_thresholds(&v)?;
        }

        if let Ok(v) = env::var("LOG_FORMAT") {
            cfg.log_format = match v.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            };
        }

        Ok(cfg)
    }

    /// Overlay a YAML config file on top of environment-derived defaults.
    /// Any key in the file not recognized by `OverlayFile` is a hard
    /// error rather than a silent no-op.
    pub fn apply_file_overlay(&mut self, yaml: &str) -> Result<(), ConfigError> {
        let raw: serde_yaml::Value = serde_yaml::from_str(yaml)
            .map_err(|e| ConfigError::ParseEnv("config_file".into(), e.to_string()))?;

        let known: HashSet<&str> = KNOWN_OVERLAY_KEYS.iter().copied().collect();
        if let serde_yaml::Value::Mapping(map) = &raw {
            for key in map.keys() {
                if let Some(k) = key.as_str() {
                    if !known.contains(k) {
                        return Err(ConfigError::UnknownKey(k.to_string()));
                    }
                }
            }
        }

        let overlay: OverlayFile = serde_yaml::from_value(raw)
            .map_err(|e| ConfigError::ParseEnv("config_file".into(), e.to_string()))?;

        if let Some(v) = overlay.min_liquidity_usd {
            self.min_liquidity_usd = v;
        }
        if let Some(v) = overlay.min_arbitrage_profit_usd {
            self.min_arbitrage_profit_usd = v;
        }
        if let Some(v) = overlay.default_profit_threshold_bps {
            self.default_profit_threshold_bps = v;
        }
        if let Some(v) = overlay.dry_run {
            self.dry_run = v;
        }
        if let Some(v) = overlay.private_bundle_enabled {
            self.private_bundle_enabled = v;
        }
        if let Some(v) = overlay.private_bundle_refund_bps {
            self.private_bundle_refund_bps = v;
        }
        if let Some(v) = &overlay.profit_thresholds {
            self.profit_threshold_overrides = parse_profit_thresholds(v)?;
        }

        Ok(())
    }
}

const KNOWN_OVERLAY_KEYS: &[&str] = &[
    "min_liquidity_usd",
    "min_arbitrage_profit_usd",
    "default_profit_threshold_bps",
    "dry_run",
    "private_bundle_enabled",
    "private_bundle_refund_bps",
    "profit_thresholds",
];

#[derive(Debug, Deserialize, Default)]
struct OverlayFile {
    min_liquidity_usd: Option<f64>,
    min_arbitrage_profit_usd: Option<f64>,
    default_profit_threshold_bps: Option<u32>,
    dry_run: Option<bool>,
    private_bundle_enabled: Option<bool>,
    private_bundle_refund_bps: Option<u32>,
    profit_thresholds: Option<String>,
}

/// Parses comma-separated `SYMBOL:SYMBOL:usd` triples (e.g.
/// `"WETH:USDC:50,WMON:USDT:10"`) into per-pair USD overrides. An
/// unrecognized symbol or malformed triple is a hard parse error rather
/// than a silently skipped entry.
fn parse_profit_thresholds(raw: &str) -> Result<Vec<(Address, Address, f64)>, ConfigError> {
    let mut out = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let parts: Vec<&str> = entry.split(':').collect();
        let [sym_a, sym_b, usd] = parts.as_slice() else {
            return Err(ConfigError::ParseEnv(
                "PROFIT_THRESHOLDS".to_string(),
                entry.to_string(),
            ));
        };
        let addr_a = tokens::by_symbol(sym_a).ok_or_else(|| {
            ConfigError::ParseEnv("PROFIT_THRESHOLDS".to_string(), sym_a.to_string())
        })?;
        let addr_b = tokens::by_symbol(sym_b).ok_or_else(|| {
            ConfigError::ParseEnv("PROFIT_THRESHOLDS".to_string(), sym_b.to_string())
        })?;
        let usd_value: f64 = usd
            .parse()
            .map_err(|_| ConfigError::ParseEnv("PROFIT_THRESHOLDS".to_string(), usd.to_string()))?;
        out.push((addr_a, addr_b, usd_value));
    }
    Ok(out)
}

/// Scales a USD price into the Price Oracle Validator's 1e18 fixed-point
/// representation. Saturates rather than panicking on an out-of-range
/// input.
pub fn usd_to_price_scaled_1e18(usd: f64) -> U256 {
    if usd <= 0.0 {
        return U256::ZERO;
    }
    U256::from((usd * 1e18) as u128)
}

fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .map_err(|_| ConfigError::ParseEnv(key.to_string(), v)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_thresholds() {
        let cfg = EngineConfig::default();
        assert!(cfg.dry_run);
        assert_eq!(cfg.candidate_deadline_ms, 50);
        assert_eq!(cfg.private_bundle_refund_bps, 9_000);
    }

    #[test]
    fn overlay_rejects_unknown_key() {
        let mut cfg = EngineConfig::default();
        let yaml = "min_liquidity_usd: 500\nbogus_key: true\n";
        let err = cfg.apply_file_overlay(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKey(k) if k == "bogus_key"));
    }

    #[test]
    fn overlay_applies_known_keys() {
        let mut cfg = EngineConfig::default();
        let yaml = "min_liquidity_usd: 2500\nprivate_bundle_enabled: true\n";
        cfg.apply_file_overlay(yaml).unwrap();
        assert_eq!(cfg.min_liquidity_usd, 2500.0);
        assert!(cfg.private_bundle_enabled);
    }

    #[test]
    fn token_symbol_lookup() {
        assert_eq!(tokens::symbol(tokens::WMON), "WMON");
        assert_eq!(tokens::decimals(tokens::USDC), 6);
    }

    #[test]
    fn profit_thresholds_overlay_parses_pairs() {
        let mut cfg = EngineConfig::default();
        let yaml = "profit_thresholds: \"WETH:USDC:50,WMON:USDT:10\"\n";
        cfg.apply_file_overlay(yaml).unwrap();
        assert_eq!(cfg.profit_threshold_overrides.len(), 2);
        assert_eq!(cfg.profit_threshold_overrides[0], (tokens::WETH, tokens::USDC, 50.0));
        assert_eq!(cfg.profit_threshold_overrides[1], (tokens::WMON, tokens::USDT, 10.0));
    }

    #[test]
    fn profit_thresholds_rejects_unknown_symbol() {
        let mut cfg = EngineConfig::default();
        let yaml = "profit_thresholds: \"WETH:NOTATOKEN:50\"\n";
        assert!(cfg.apply_file_overlay(yaml).is_err());
    }

    #[test]
    fn usd_to_price_scaled_round_trips_approximately() {
        let scaled = usd_to_price_scaled_1e18(3_000.0);
        assert_eq!(scaled, U256::from(3_000u128 * 10u128.pow(18)));
        assert_eq!(usd_to_price_scaled_1e18(0.0), U256::ZERO);
        assert_eq!(usd_to_price_scaled_1e18(-1.0), U256::ZERO);
    }
}
