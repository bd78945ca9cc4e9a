use multisend_core::{error::EngineError, signer::AccountSigner};

use crate::classifier::SendErrorKind;
use crate::fees::FeeEstimator;
use crate::monitor::send_replacement;
use crate::network::Network;

/// Which pending nonces to replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceSelection {
    /// Everything between the latest mined nonce and the pending nonce.
    All,
    Single(u64),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CancelSummary {
    pub cancelled: Vec<u64>,
    pub failed: Vec<u64>,
}

/// Replace stuck mempool transactions for `account` by sending zero-value
/// self-transfers at the same nonces with an aggressive fee.
///
/// A "nonce already used" style rejection counts as success: the original
/// transaction won the race, which clears the queue just as well.
pub async fn cancel_pending_nonces<N: Network, A: AccountSigner>(
    network: &N,
    estimator: &FeeEstimator<N>,
    account: &A,
    selection: NonceSelection,
) -> Result<CancelSummary, EngineError> {
    let address = account.address();
    let latest = network.latest_nonce(address).await?;
    let pending = network.pending_nonce(address).await?;

    if pending <= latest {
        tracing::info!(account = %address, "no pending transactions to cancel");
        return Ok(CancelSummary::default());
    }

    tracing::info!(
        account = %address,
        latest,
        pending,
        outstanding = pending - latest,
        "cancelling pending transactions"
    );

    let nonces: Vec<u64> = match selection {
        NonceSelection::All => (latest..pending).collect(),
        NonceSelection::Single(nonce) => {
            if nonce < latest || nonce >= pending {
                return Err(EngineError::ValidationError {
                    message: format!(
                        "nonce {nonce} is not pending (latest {latest}, pending {pending})"
                    ),
                });
            }
            vec![nonce]
        }
    };

    let mut summary = CancelSummary::default();
    for nonce in nonces {
        match send_replacement(network, estimator, account, nonce).await {
            Ok((hash, _receipt)) => {
                tracing::info!(nonce, cancel_hash = %hash, "nonce cancelled");
                summary.cancelled.push(nonce);
            }
            Err(e) if SendErrorKind::classify(&e) == SendErrorKind::NonceConflict => {
                tracing::info!(nonce, "nonce already consumed by another transaction");
                summary.cancelled.push(nonce);
            }
            Err(e) => {
                tracing::error!(nonce, error = %e, "cancellation failed");
                summary.failed.push(nonce);
            }
        }
    }

    Ok(summary)
}
