use std::sync::Arc;
use std::time::Duration;

use alloy::{
    network::TransactionBuilder,
    primitives::{Address, TxHash, U256},
    rpc::types::TransactionRequest,
};
use multisend_core::{
    error::EngineError,
    signer::AccountSigner,
    transfer::{FeeQuote, erc20_transfer_calldata},
};

use crate::classifier::SendErrorKind;
use crate::fees::FeeEstimator;
use crate::monitor::TransactionMonitor;
use crate::network::{Network, TxStatus};
use crate::nonce::{AttemptToken, NonceLedger};
use crate::notify::Notifier;
use crate::rows::Recipient;

/// Fee uplift per attempt, in percent, capped at the last entry.
const UPLIFT_SCHEDULE: [u32; 5] = [0, 10, 20, 30, 40];

const BASE_BACKOFF_MS: u64 = 1_000;
const MAX_BACKOFF_MS: u64 = 30_000;

/// Safety margin applied on top of the network's gas estimate.
const GAS_MARGIN_PERCENT: u64 = 20;

/// Used when gas estimation itself fails; generous enough for any ERC-20
/// transfer.
const FALLBACK_GAS_LIMIT: u64 = 100_000;

#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// ERC-20 contract the transfers go through.
    pub token: Address,
    pub token_symbol: String,
    pub max_attempts: u32,
}

impl SenderConfig {
    pub fn new(token: Address, token_symbol: impl Into<String>) -> Self {
        Self {
            token,
            token_symbol: token_symbol.into(),
            max_attempts: 5,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.clamp(1, 10);
        self
    }
}

/// A nonce already claimed for this submission by the orchestrator.
#[derive(Debug, Clone, Copy)]
pub struct ReservedNonce {
    pub nonce: u64,
    pub token: AttemptToken,
}

#[derive(Debug, Clone)]
pub enum SubmissionOutcome {
    Confirmed { tx_hash: TxHash, nonce: u64 },
    Failed { error: String },
}

impl SubmissionOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, SubmissionOutcome::Confirmed { .. })
    }
}

/// Drives one logical transfer through build, sign, send and confirm,
/// retrying with escalating fees until it lands or the configured attempts
/// run out.
pub struct TransferSender<N: Network, A: AccountSigner> {
    pub network: Arc<N>,
    pub account: Arc<A>,
    pub ledger: Arc<NonceLedger>,
    pub monitor: Arc<TransactionMonitor<N>>,
    pub estimator: FeeEstimator<N>,
    pub notifier: Arc<dyn Notifier>,
    pub config: SenderConfig,
}

impl<N: Network, A: AccountSigner> TransferSender<N, A> {
    pub async fn submit(
        &self,
        recipient: &Recipient,
        reserved: ReservedNonce,
    ) -> SubmissionOutcome {
        let account = self.account.address();
        let token = reserved.token;
        let mut nonce = reserved.nonce;
        let mut have_nonce = true;
        let mut last_error: Option<EngineError> = None;

        for attempt in 0..self.config.max_attempts {
            if attempt > 0 {
                let backoff = backoff_delay(attempt);
                tracing::info!(
                    recipient = %recipient.address,
                    attempt = attempt + 1,
                    max_attempts = self.config.max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    "retrying after backoff"
                );
                tokio::time::sleep(backoff).await;
            }

            // Deal with anything stuck before putting more load behind it.
            if let Err(e) = self.monitor.sweep(&*self.account).await {
                tracing::warn!(error = %e, "stuck-transaction sweep failed");
            }

            // The held nonce may have been released on an earlier error and
            // re-claimed by a concurrent attempt in the meantime.
            if !have_nonce || !self.ledger.held_by(account, nonce, token) {
                match self.ledger.reserve(&*self.network, account, token).await {
                    Ok(fresh) => {
                        tracing::debug!(nonce = fresh, "reserved fresh nonce");
                        nonce = fresh;
                        have_nonce = true;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "nonce reservation failed");
                        last_error = Some(e);
                        continue;
                    }
                }
            }

            match self.attempt_send(recipient, nonce, attempt).await {
                Ok(SendPhase::Confirmed { tx_hash }) => {
                    tracing::info!(
                        recipient = %recipient.address,
                        amount = %recipient.amount_display,
                        tx_hash = %tx_hash,
                        nonce,
                        "transfer confirmed"
                    );
                    // The nonce is consumed by the mined transaction, not
                    // released; resync reclaims the ledger entry.
                    return SubmissionOutcome::Confirmed { tx_hash, nonce };
                }
                Ok(SendPhase::Reverted { tx_hash }) => {
                    tracing::error!(
                        recipient = %recipient.address,
                        tx_hash = %tx_hash,
                        nonce,
                        "transfer mined but reverted"
                    );
                    return SubmissionOutcome::Failed {
                        error: format!("transaction {tx_hash} reverted"),
                    };
                }
                Ok(SendPhase::ConfirmationLost { tx_hash }) => {
                    // The transaction was accepted but the confirmation wait
                    // failed. It may still land: keep the claim so the nonce
                    // cannot be reused, leave the monitor record in place,
                    // and move on with a fresh nonce.
                    tracing::warn!(
                        tx_hash = %tx_hash,
                        nonce,
                        "confirmation wait failed, transaction left to the monitor"
                    );
                    last_error = Some(EngineError::InternalError {
                        message: format!("confirmation wait failed for {tx_hash}"),
                    });
                    have_nonce = false;
                    continue;
                }
                Err(AttemptError::Preparation(error)) => {
                    // Nothing reached the network; the nonce stays claimed
                    // and the next attempt retries with it.
                    tracing::warn!(
                        recipient = %recipient.address,
                        nonce,
                        attempt = attempt + 1,
                        error = %error,
                        "attempt failed before broadcast"
                    );
                    last_error = Some(error);
                }
                Err(AttemptError::Send { error, tx_hash }) => {
                    let kind = SendErrorKind::classify(&error);
                    tracing::warn!(
                        recipient = %recipient.address,
                        nonce,
                        attempt = attempt + 1,
                        kind = ?kind,
                        error = %error,
                        "broadcast rejected"
                    );

                    let strategy = kind.strategy();
                    if kind == SendErrorKind::Other {
                        // The RPC reply was inconclusive; the transaction
                        // may have reached the network anyway. Only release
                        // the nonce once a status probe comes back empty.
                        self.release_unless_in_flight(recipient, nonce, token, tx_hash)
                            .await;
                        have_nonce = false;
                    } else {
                        if strategy.release_nonce {
                            self.ledger.release(account, nonce, token);
                        }
                        if strategy.reacquire_nonce {
                            have_nonce = false;
                        }
                    }

                    last_error = Some(error);
                    if !strategy.retryable {
                        break;
                    }
                }
            }
        }

        if have_nonce {
            self.ledger.release(account, nonce, token);
        }

        let error = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "retries exhausted".to_string());
        tracing::error!(
            recipient = %recipient.address,
            attempts = self.config.max_attempts,
            error = %error,
            "transfer failed"
        );
        SubmissionOutcome::Failed { error }
    }

    async fn attempt_send(
        &self,
        recipient: &Recipient,
        nonce: u64,
        attempt: u32,
    ) -> Result<SendPhase, AttemptError> {
        let uplift =
            UPLIFT_SCHEDULE[(attempt as usize).min(UPLIFT_SCHEDULE.len() - 1)];
        let quote = self
            .estimator
            .quote(uplift)
            .await
            .map_err(AttemptError::Preparation)?;

        let calldata = erc20_transfer_calldata(recipient.address, recipient.amount);
        let mut request = TransactionRequest::default()
            .with_from(self.account.address())
            .with_to(self.config.token)
            .with_value(U256::ZERO)
            .with_input(calldata)
            .with_chain_id(self.network.chain_id())
            .with_nonce(nonce);

        request = match quote {
            FeeQuote::DynamicFee {
                max_priority_fee_per_gas,
                max_fee_per_gas,
            } => request
                .with_max_priority_fee_per_gas(max_priority_fee_per_gas)
                .with_max_fee_per_gas(max_fee_per_gas),
            FeeQuote::Legacy { gas_price } => request.with_gas_price(gas_price),
        };

        let gas_limit = match self.network.estimate_gas(&request).await {
            Ok(estimate) => estimate.saturating_mul(100 + GAS_MARGIN_PERCENT) / 100,
            Err(e) => {
                tracing::warn!(error = %e, "gas estimation failed, using fallback limit");
                FALLBACK_GAS_LIMIT
            }
        };
        request = request.with_gas_limit(gas_limit);

        tracing::debug!(
            nonce,
            gas_limit,
            uplift_percent = uplift,
            fee = ?quote,
            "broadcasting transfer"
        );

        let typed_tx =
            request
                .build_typed_tx()
                .map_err(|e| {
                    AttemptError::Preparation(EngineError::TransactionBuildFailed {
                        message: format!("Failed to build typed transaction: {e:?}"),
                    })
                })?;

        let signed = self
            .account
            .sign_transaction(typed_tx)
            .await
            .map_err(AttemptError::Preparation)?;
        let precomputed_hash = *signed.hash();

        let tx_hash = self
            .network
            .broadcast(signed.into())
            .await
            .map_err(|error| AttemptError::Send {
                error,
                tx_hash: precomputed_hash,
            })?;

        self.monitor.register(tx_hash, nonce, recipient.address);
        self.notifier.notify(
            &format!(
                "Sent {} {} to {}",
                recipient.amount_display, self.config.token_symbol, recipient.address
            ),
            Some(tx_hash),
        );

        match self.network.wait_for_receipt(tx_hash).await {
            Ok(receipt) => {
                self.monitor.remove(&tx_hash);
                if receipt.status {
                    Ok(SendPhase::Confirmed { tx_hash })
                } else {
                    Ok(SendPhase::Reverted { tx_hash })
                }
            }
            Err(_) => Ok(SendPhase::ConfirmationLost { tx_hash }),
        }
    }

    /// Conservative release for unclassified send errors: the nonce is only
    /// freed when a status probe confirms the transaction never made it
    /// into the RPC layer.
    async fn release_unless_in_flight(
        &self,
        recipient: &Recipient,
        nonce: u64,
        token: AttemptToken,
        tx_hash: TxHash,
    ) {
        let account = self.account.address();
        let probe = self.network.transaction_status(tx_hash).await.ok();

        match probe {
            Some(TxStatus::Pending) | Some(TxStatus::Mined) => {
                tracing::warn!(
                    nonce,
                    recipient = %recipient.address,
                    "transaction visible despite send error, keeping nonce claimed"
                );
            }
            _ => {
                self.ledger.release(account, nonce, token);
            }
        }
    }
}

enum SendPhase {
    Confirmed { tx_hash: TxHash },
    Reverted { tx_hash: TxHash },
    ConfirmationLost { tx_hash: TxHash },
}

enum AttemptError {
    /// Nothing reached the network.
    Preparation(EngineError),
    /// The broadcast itself was rejected. The hash is the one the signed
    /// transaction would carry, usable for a status probe.
    Send { error: EngineError, tx_hash: TxHash },
}

fn backoff_delay(attempt: u32) -> Duration {
    let ms = BASE_BACKOFF_MS.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(ms.min(MAX_BACKOFF_MS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(1), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(2), Duration::from_millis(4_000));
        assert_eq!(backoff_delay(4), Duration::from_millis(16_000));
        assert_eq!(backoff_delay(5), Duration::from_millis(30_000));
        assert_eq!(backoff_delay(12), Duration::from_millis(30_000));
    }

    #[test]
    fn uplift_schedule_caps_at_last_entry() {
        let at = |attempt: usize| UPLIFT_SCHEDULE[attempt.min(UPLIFT_SCHEDULE.len() - 1)];
        assert_eq!(at(0), 0);
        assert_eq!(at(3), 30);
        assert_eq!(at(4), 40);
        assert_eq!(at(9), 40);
    }
}
