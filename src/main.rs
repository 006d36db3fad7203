//! Arbitrage execution engine entrypoint: wires upstream feeds, the
//! Liquidity Graph, Path Finder, Profitability Engine, Price Oracle
//! Validator, Flash-Loan Selector, Bundle Simulator, Risk Gate, Safety
//! Governor, and Execution Dispatch into one pipeline.

mod bundle_sim;
mod config;
mod dex;
mod dispatch;
mod error;
mod feed;
mod flash_loan;
mod graph;
mod multicall;
mod observer;
mod oracle;
mod orchestrator;
mod path_finder;
mod persistence;
mod profitability;
mod risk;
mod safety;
mod types;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use clap::Parser;
use eyre::{Result, WrapErr};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{error, info, warn, Level};

use crate::bundle_sim::{MempoolShadow, ThreatThresholds};
use crate::config::{tokens, EngineConfig, LogFormat};
use crate::dex::batch_client::BatchDexManager;
use crate::flash_loan::SourceAvailability;
use crate::graph::{ArbitrageGraph, PoolUpdate};
use crate::observer::{EngineEvent, Observer};
use crate::oracle::{PriceOracleValidator, SymbolConfig};
use crate::orchestrator::{
    Candidate, CandidateQueue, OrchestratorConfig, PipelineContext, PipelineResources,
};
use crate::path_finder::PathFinderConfig;
use crate::persistence::{decision_reason, ExecutionRecord, OpportunityRecord, PersistenceStore};
use crate::profitability::ThresholdTable;
use crate::risk::RiskGateConfig;
use crate::safety::{CircuitBreaker, EmergencyStop, RateLimiter, SafetyGovernor};

const EXIT_CONFIG_ERROR: i32 = 2;
const EXIT_EMERGENCY_STOP_LATCHED: i32 = 3;
const EXIT_FEED_LOST: i32 = 4;

#[derive(Parser, Debug)]
#[command(name = "arb-engine")]
#[command(about = "On-chain arbitrage execution engine")]
struct Args {
    /// Path to an optional YAML config overlay.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Force dry-run mode regardless of configuration (safe default for
    /// manual invocation).
    #[arg(long)]
    dry_run: bool,

    /// Force live (non-dry-run) mode. Ignored if `--dry-run` is also set.
    #[arg(long)]
    live: bool,

    /// Directory the persistence logs are written under.
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// Number of concurrent pipeline workers draining the candidate
    /// queue.
    #[arg(long, default_value = "4")]
    workers: usize,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn init_tracing(format: LogFormat) {
    match format {
        LogFormat::Pretty => {
            tracing_subscriber::fmt()
                .with_max_level(Level::INFO)
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .json()
                .with_max_level(Level::INFO)
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .init();
        }
    }
}

/// Conservative flash-loan availability used until a dedicated on-chain
/// depth reader is wired up: Aave is assumed reachable up to a large cap
/// (the selector still checks `amount <= cap`), dYdX gating follows the
/// chain-id rule already encoded in `flash_loan::select`, and
/// Balancer/Uniswap-V3-pool-owned liquidity are left unavailable rather
/// than guessed.
fn default_source_availability() -> SourceAvailability {
    SourceAvailability {
        balancer_liquidity: None,
        balancer_supports_token: false,
        aave_pool_cap: Some(U256::MAX),
        uniswap_v3_pool_depth: None,
        uniswap_v3_pool_fee_bps: None,
        dydx_supports_token: true,
    }
}

fn register_oracle_symbols(oracle: &PriceOracleValidator, cfg: &EngineConfig) {
    let base = SymbolConfig {
        min_price: config::usd_to_price_scaled_1e18(cfg.oracle_min_price_usd),
        max_price: config::usd_to_price_scaled_1e18(cfg.oracle_max_price_usd),
        max_rate_change_bps: cfg.oracle_max_rate_change_bps,
        max_price_age_ms: cfg.oracle_stale_after_ms,
        timelock_ms: cfg.oracle_timelock_seconds * 1_000,
        ..SymbolConfig::default()
    };
    for symbol in ["WMON", "USDC", "USDT", "WETH"] {
        oracle.register_symbol(symbol, base.clone());
    }
}

/// Placeholder baseline capital (USD) until a real balance reader is
/// wired up. Shared between `EmergencyStop`'s trip floor and the running
/// capital ledger so both start from the same number.
fn baseline_capital_usd(cfg: &EngineConfig) -> f64 {
    cfg.min_arbitrage_profit_usd.max(1.0) * 1_000.0
}

fn build_safety_governor(cfg: &EngineConfig) -> SafetyGovernor {
    let breaker = CircuitBreaker::new(
        cfg.emergency_stop_max_consecutive_errors,
        i128::MAX,
        cfg.circuit_breaker_cooldown_seconds * 1_000,
    );
    let emergency_stop = EmergencyStop::new(
        baseline_capital_usd(cfg),
        cfg.circuit_breaker_trip_threshold_bps as f64 / 10_000.0,
        cfg.emergency_stop_max_consecutive_errors,
    );
    let rate_limiter = RateLimiter::new(
        cfg.rate_limit_window_seconds * 1_000,
        cfg.rate_limit_max_requests,
    );
    SafetyGovernor::new(breaker, emergency_stop, rate_limiter)
}

/// Pull fresh pool state from every configured DEX and fold it into the
/// Liquidity Graph as one transactional block update.
async fn discover_and_apply<P: Provider + Clone + Send + Sync + 'static>(
    manager: &BatchDexManager<P>,
    graph: &mut ArbitrageGraph,
    block_number: u64,
) -> Result<usize> {
    let result = manager.fetch_all_pools(&tokens::BASE_TOKENS).await;
    let observed_at_ms = now_ms();
    let updates: Vec<PoolUpdate> = result
        .pools
        .into_iter()
        .map(|pool| PoolUpdate {
            pool,
            block_number,
            observed_at_ms,
        })
        .collect();
    let applied = updates.len();
    if let Err(e) = graph.apply_block(&updates, observed_at_ms) {
        warn!(error = %e, "block update rejected, graph left at previous block");
    }
    Ok(applied)
}

/// Search every base token for candidate cycles and enqueue them.
fn enqueue_candidates(
    view: &graph::GraphView,
    queue: &CandidateQueue,
    cfg: &EngineConfig,
) {
    let finder_cfg = PathFinderConfig {
        max_hops: cfg.max_path_len,
        min_liquidity: cfg.min_liquidity_usd,
        max_edge_age_ms: cfg.oracle_stale_after_ms,
        reference_size: U256::from(10u128).pow(U256::from(18u64)),
        gas_per_hop: 120_000,
    };

    for start in tokens::BASE_TOKENS {
        if view.get_node(start).is_none() {
            continue;
        }
        match path_finder::find_paths(view, start, now_ms(), &finder_cfg) {
            Ok(paths) => {
                for path in paths {
                    let Some(end) = path.end_token() else { continue };
                    queue.push(Candidate {
                        path,
                        borrow_token: start,
                        borrow_token_symbol: tokens::symbol(start),
                        native_symbol: tokens::symbol(tokens::WMON),
                        input_amount: U256::from(10u128).pow(U256::from(18u64)),
                        amount_usd: cfg.min_arbitrage_profit_usd.max(1.0) * 10.0,
                        enqueued_at_ms: now_ms(),
                    });
                    let _ = end;
                }
            }
            Err(e) => warn!(error = %e, token = ?start, "path finder failed for base token"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut cfg = match EngineConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("config error: {e}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    if let Some(path) = &args.config {
        let yaml = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("reading config overlay {}", path.display()))?;
        if let Err(e) = cfg.apply_file_overlay(&yaml) {
            eprintln!("config overlay error: {e}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    }
    if args.dry_run {
        cfg.dry_run = true;
    } else if args.live {
        cfg.dry_run = false;
    }

    init_tracing(cfg.log_format);
    info!(dry_run = cfg.dry_run, chain_id = cfg.chain_id, "starting arb-engine");

    let persistence = Arc::new(PersistenceStore::new(&args.data_dir));
    let observer = Observer::new(1_024);

    let emergency_sentinel = args.data_dir.join("EMERGENCY_STOP");
    if emergency_sentinel.exists() {
        error!("emergency-stop sentinel present at startup, refusing to start");
        std::process::exit(EXIT_EMERGENCY_STOP_LATCHED);
    }

    // A signer is needed even in dry-run mode: the provider type returned
    // by `ProviderBuilder` is the same whether or not a transaction is
    // ever actually signed, so one signer is built up front rather than
    // threading two incompatible provider types through the rest of
    // `main`. An ephemeral key stands in when dry-running without
    // `PRIVATE_KEY` set.
    let signer: PrivateKeySigner = match std::env::var("PRIVATE_KEY") {
        Ok(pk) => pk.parse().wrap_err("parsing PRIVATE_KEY")?,
        Err(_) if cfg.dry_run => PrivateKeySigner::random(),
        Err(_) => return Err(eyre::eyre!("PRIVATE_KEY must be set when dry_run is false")),
    };
    let eth_wallet = EthereumWallet::from(signer);
    let signer_address = eth_wallet.default_signer().address();
    let http_provider = ProviderBuilder::new()
        .wallet(eth_wallet)
        .connect_http(cfg.rpc_url.parse().wrap_err("parsing rpc_url")?);

    let dex_manager = Arc::new(BatchDexManager::new(http_provider.clone()));

    let oracle = Arc::new(PriceOracleValidator::new());
    register_oracle_symbols(&oracle, &cfg);

    let safety = Arc::new(build_safety_governor(&cfg));
    let mut threshold_table = ThresholdTable::new(ThresholdTable::usd_to_token_units(
        cfg.min_arbitrage_profit_usd,
        U256::from(10u128).pow(U256::from(18u64)),
        18,
    ));
    for (a, b, usd) in &cfg.profit_threshold_overrides {
        let decimals = tokens::decimals(*a);
        let threshold = ThresholdTable::usd_to_token_units(
            *usd,
            U256::from(10u128).pow(U256::from(18u64)),
            decimals,
        );
        threshold_table = threshold_table.with_override(*a, *b, threshold);
    }
    let threshold_table = Arc::new(threshold_table);
    let risk_config = Arc::new(RiskGateConfig::default());
    let mempool_shadow = Arc::new(MempoolShadow::new(cfg.mempool_shadow_capacity));
    let threat_thresholds = Arc::new(ThreatThresholds {
        p_low: 0.2,
        p_high: 0.6,
        erosion_low_bps: 50,
        erosion_high_bps: 300,
        private_fallback_enabled: cfg.private_bundle_enabled,
    });
    let flash_loan_availability = Arc::new(default_source_availability());
    let resources = Arc::new(PipelineResources::new(8, 4, 2));
    // Running ledger of cumulative realized profit/loss, in the same USD
    // units as `EmergencyStop`'s baseline; feeds `observe_capital` so the
    // capital-drawdown trigger can actually fire against live trading
    // results.
    let capital_ledger = Arc::new(Mutex::new(baseline_capital_usd(&cfg)));
    let orchestrator_cfg = OrchestratorConfig {
        candidate_deadline_ms: cfg.candidate_deadline_ms,
    };

    let queue = Arc::new(CandidateQueue::new(cfg.stage_channel_capacity));

    for i in 0..args.workers {
        let queue = queue.clone();
        let oracle = oracle.clone();
        let threshold_table = threshold_table.clone();
        let risk_config = risk_config.clone();
        let flash_loan_availability = flash_loan_availability.clone();
        let mempool_shadow = mempool_shadow.clone();
        let threat_thresholds = threat_thresholds.clone();
        let safety = safety.clone();
        let capital_ledger = capital_ledger.clone();
        let resources = resources.clone();
        let orchestrator_cfg = orchestrator_cfg;
        let persistence = persistence.clone();
        let observer = observer.clone();
        let chain_id = cfg.chain_id;
        let hybrid_threshold_usd = crate::flash_loan::DEFAULT_HYBRID_THRESHOLD_USD;
        let dry_run = cfg.dry_run;
        let http_provider = http_provider.clone();
        let worker_cfg = cfg.clone();
        let signer_address = signer_address;

        tokio::spawn(async move {
            loop {
                let candidate = queue.pop().await;
                let start_token = candidate.borrow_token;
                let hop_count = candidate.path.hop_count();
                let gas_price_wei = profitability::default_gas_price(&worker_cfg);

                let ctx = PipelineContext {
                    oracle: &oracle,
                    threshold_table: &threshold_table,
                    risk_config: &risk_config,
                    flash_loan_availability: &flash_loan_availability,
                    hybrid_threshold_usd,
                    chain_id,
                    mempool_shadow: &mempool_shadow,
                    threat_thresholds: &threat_thresholds,
                    safety: &safety,
                    gas_price_wei,
                    resources: &resources,
                    config: &orchestrator_cfg,
                };

                let path_for_record = candidate.path.clone();
                let outcome = orchestrator::run_pipeline(candidate, &ctx, |_path, _flash, threat| {
                    !dry_run
                        && !matches!(
                            threat.recommendation,
                            crate::types::ThreatRecommendation::Abort
                        )
                })
                .await;

                match outcome {
                    Ok(result) => {
                        let record = OpportunityRecord {
                            ts_ms: now_ms(),
                            chain_id,
                            path: path_for_record.clone(),
                            gross_profit: path_for_record.gross_profit.to_string(),
                            net_profit: result.profit.net,
                            risk: result.risk.clone(),
                            threat: result.threat.clone(),
                            dispatched: result.dispatched,
                            decision_reason: decision_reason(
                                result.dispatched,
                                Some(start_token),
                                hop_count,
                            ),
                        };
                        if let Err(e) = persistence.record_opportunity(&record) {
                            warn!(error = %e, "failed to persist opportunity record");
                        }
                        observer.publish(EngineEvent::RiskEvaluated {
                            start_token,
                            result: result.risk.clone(),
                        });
                        observer.publish(EngineEvent::ThreatAssessed {
                            start_token,
                            assessment: result.threat.clone(),
                        });

                        if result.dispatched {
                            let request = dispatch::DispatchRequest {
                                to: path_for_record
                                    .hops
                                    .first()
                                    .map(|h| h.pool_id)
                                    .unwrap_or(Address::ZERO),
                                // Calldata for the on-chain executor contract is
                                // produced by a downstream integration outside this
                                // module's scope; dispatch here only shapes and
                                // submits the request.
                                calldata: Default::default(),
                                gas_limit: path_for_record.gas_estimate,
                                gas_price_wei,
                                chain_id,
                                signer_address,
                            };
                            let dispatch_outcome = dispatch::dispatch(
                                &http_provider,
                                &request,
                                &result.threat,
                                &result.flash_loan,
                                dry_run,
                            )
                            .await;

                            match dispatch_outcome {
                                Ok(d) => {
                                    safety.breaker.on_trade(result.profit.net, now_ms());
                                    safety.emergency_stop.observe_success();
                                    let capital = {
                                        let mut ledger = capital_ledger.lock();
                                        *ledger += result.profit.net as f64 / 1e18;
                                        *ledger
                                    };
                                    safety.emergency_stop.observe_capital(capital);
                                    let exec = ExecutionRecord {
                                        ts_ms: now_ms(),
                                        tx_hash: d.tx_hash.clone(),
                                        bundle_hash: d.bundle_hash.clone(),
                                        status: "submitted".into(),
                                        realized_profit: None,
                                        source: if d.submitted_publicly {
                                            "public"
                                        } else {
                                            "private"
                                        },
                                    };
                                    if let Err(e) = persistence.record_execution(&exec) {
                                        warn!(error = %e, "failed to persist execution record");
                                    }
                                    observer.publish(EngineEvent::Dispatched {
                                        start_token,
                                        tx_hash: d.tx_hash,
                                        bundle_hash: d.bundle_hash,
                                        private: !d.submitted_publicly,
                                    });
                                }
                                Err(e) => {
                                    safety.emergency_stop.observe_error();
                                    warn!(error = %e, "dispatch failed");
                                }
                            }
                        }
                    }
                    Err(e) => {
                        observer.publish(EngineEvent::CandidateRejected {
                            start_token,
                            stage: "pipeline",
                            reason: e.to_string(),
                        });
                    }
                }
            }
        });
        info!(worker = i, "pipeline worker started");
    }

    let mut graph = ArbitrageGraph::new();

    match &cfg.ws_url {
        Some(ws_url) => {
            let (tx, mut rx) = mpsc::channel(64);
            let ws_url = ws_url.clone();
            let feed_handle = tokio::spawn(async move {
                feed::run_block_subscription(&ws_url, tx, feed::BackoffConfig::default(), 256).await
            });

            loop {
                tokio::select! {
                    block = rx.recv() => {
                        match block {
                            Some(block) => {
                                let block_number = block.header.number;
                                match discover_and_apply(&dex_manager, &mut graph, block_number).await {
                                    Ok(count) => {
                                        info!(block_number, pools = count, "graph updated");
                                        let view = graph.snapshot();
                                        enqueue_candidates(&view, &queue, &cfg);
                                    }
                                    Err(e) => warn!(error = %e, "discovery failed for block"),
                                }
                            }
                            None => {
                                error!("block feed channel closed, upstream lost");
                                break;
                            }
                        }
                    }
                }
            }

            if feed_handle.await.is_err() {
                error!("block subscription task panicked");
            }
            error!("upstream feed lost beyond recovery, shutting down");
            std::process::exit(EXIT_FEED_LOST);
        }
        None => {
            warn!("no ws_url configured, falling back to periodic polling discovery");
            let mut tick = tokio::time::interval(std::time::Duration::from_secs(2));
            let mut block_number = 0u64;
            loop {
                tick.tick().await;
                block_number += 1;
                match discover_and_apply(&dex_manager, &mut graph, block_number).await {
                    Ok(count) => {
                        info!(block_number, pools = count, "graph updated");
                        let view = graph.snapshot();
                        enqueue_candidates(&view, &queue, &cfg);
                    }
                    Err(e) => warn!(error = %e, "discovery failed"),
                }
            }
        }
    }

    #[allow(unreachable_code)]
    Ok(())
}
