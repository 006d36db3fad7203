//! Execution Dispatch: submits the winning candidate either to the
//! public mempool as a signed transaction, or to a private bundle relay
//! as an `eth_sendBundle` payload, chosen by the Bundle Simulator's
//! recommendation.

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, U256};
use alloy::providers::Provider;
use alloy::rpc::types::TransactionRequest;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::DispatchError;
use crate::types::{FlashLoanConfig, ThreatAssessment, ThreatRecommendation};

pub const DEFAULT_REFUND_BPS_TO_USER: u32 = 9_000;

/// Optional hints a private relay can be given; fewer hints trade
/// privacy for a smaller refund.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BundleHints {
    pub calldata: bool,
    pub contract_address: bool,
    pub function_selector: bool,
    pub logs: bool,
    pub hash: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundConfig {
    pub refund_bps_to_user: u32,
    pub share_tee: bool,
    pub fast_mode: bool,
}

impl Default for RefundConfig {
    fn default() -> Self {
        Self {
            refund_bps_to_user: DEFAULT_REFUND_BPS_TO_USER,
            share_tee: false,
            fast_mode: false,
        }
    }
}

/// `eth_sendBundle` request body.
#[derive(Debug, Clone, Serialize)]
pub struct SendBundleRequest {
    pub txs: Vec<Bytes>,
    pub block_number: u64,
    pub min_timestamp: Option<u64>,
    pub max_timestamp: Option<u64>,
    pub reverting_tx_hashes: Vec<String>,
    pub refund: RefundConfig,
    pub hints: BundleHints,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendBundleResponse {
    pub bundle_hash: String,
}

#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub to: Address,
    pub calldata: Bytes,
    pub gas_limit: u64,
    pub gas_price_wei: U256,
    pub chain_id: u64,
    pub signer_address: Address,
}

#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub submitted_publicly: bool,
    pub tx_hash: Option<String>,
    pub bundle_hash: Option<String>,
}

/// Public-mempool submission via a signer-attached provider. Gas is
/// estimated live and padded by 12% rather than using a hardcoded
/// limit, since arbitrary candidate calldata doesn't share one gas
/// ceiling.
pub async fn dispatch_public<P: Provider>(
    provider: &P,
    request: &DispatchRequest,
    dry_run: bool,
) -> Result<DispatchOutcome, DispatchError> {
    if dry_run {
        info!("dry run: public dispatch suppressed");
        return Err(DispatchError::DryRun);
    }

    let estimate_tx = TransactionRequest::default()
        .to(request.to)
        .from(request.signer_address)
        .input(alloy::rpc::types::TransactionInput::new(request.calldata.clone()));

    let gas_estimate = provider
        .estimate_gas(estimate_tx)
        .await
        .map_err(|e| DispatchError::Provider(e.to_string()))?;
    let gas_limit = (gas_estimate * (100 + 12)) / 100;

    let gas_price_wei = request.gas_price_wei.to::<u128>();
    let tx = TransactionRequest::default()
        .to(request.to)
        .from(request.signer_address)
        .input(request.calldata.clone().into())
        .gas_limit(gas_limit.max(request.gas_limit))
        .max_fee_per_gas(gas_price_wei + gas_price_wei / 10)
        .max_priority_fee_per_gas(gas_price_wei / 10)
        .with_chain_id(request.chain_id);

    let pending = provider
        .send_transaction(tx)
        .await
        .map_err(|e| DispatchError::Provider(e.to_string()))?;

    Ok(DispatchOutcome {
        submitted_publicly: true,
        tx_hash: Some(format!("{:?}", pending.tx_hash())),
        bundle_hash: None,
    })
}

/// Private-relay submission. The transport is left to the caller (an
/// injected JSON-RPC client) since relay endpoints vary by chain; this
/// function only shapes the `eth_sendBundle` payload.
pub fn build_bundle_request(
    raw_txs: Vec<Bytes>,
    target_block: u64,
    hints: BundleHints,
    refund: RefundConfig,
) -> SendBundleRequest {
    SendBundleRequest {
        txs: raw_txs,
        block_number: target_block,
        min_timestamp: None,
        max_timestamp: None,
        reverting_tx_hashes: Vec::new(),
        refund,
        hints,
    }
}

/// Choose and perform the dispatch path implied by the Bundle
/// Simulator's recommendation. `Abort` never reaches this function — the
/// Orchestrator filters it out before Dispatch — so it's treated as a
/// defensive `RelayRejected` rather than silently falling through.
pub async fn dispatch<P: Provider>(
    provider: &P,
    request: &DispatchRequest,
    threat: &ThreatAssessment,
    _flash_loan: &FlashLoanConfig,
    dry_run: bool,
) -> Result<DispatchOutcome, DispatchError> {
    match threat.recommendation {
        ThreatRecommendation::PublicExecute => dispatch_public(provider, request, dry_run).await,
        ThreatRecommendation::PrivateExecute => {
            if dry_run {
                info!("dry run: private dispatch suppressed");
                return Err(DispatchError::DryRun);
            }
            warn!("private relay transport not wired to a live endpoint; treating as rejected");
            Err(DispatchError::RelayRejected(
                "no private relay transport configured".to_string(),
            ))
        }
        ThreatRecommendation::Abort => Err(DispatchError::RelayRejected(
            "bundle simulator recommended abort".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_request_carries_default_refund() {
        let req = build_bundle_request(vec![], 100, BundleHints::default(), RefundConfig::default());
        assert_eq!(req.refund.refund_bps_to_user, DEFAULT_REFUND_BPS_TO_USER);
        assert_eq!(req.block_number, 100);
    }

    #[test]
    fn fewer_hints_is_a_valid_request_shape() {
        let hints = BundleHints {
            calldata: true,
            ..Default::default()
        };
        let req = build_bundle_request(vec![], 1, hints, RefundConfig::default());
        assert!(req.hints.calldata);
        assert!(!req.hints.logs);
    }
}
