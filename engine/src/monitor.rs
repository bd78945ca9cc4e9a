use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::{
    network::TransactionBuilder,
    primitives::{Address, Bytes, TxHash, U256},
    rpc::types::TransactionRequest,
};
use multisend_core::{error::EngineError, signer::AccountSigner, transfer::FeeQuote};

use crate::fees::{CANCEL_UPLIFT_PERCENT, FeeEstimator};
use crate::network::{ConfirmedReceipt, Network, TxStatus};

/// Gas cost of a plain value transfer, all a cancellation ever needs.
const CANCEL_GAS_LIMIT: u64 = 21_000;

/// Time source for staleness decisions, injectable so tests can simulate
/// elapsed time.
pub trait Clock: Send + Sync + 'static {
    fn now_ms(&self) -> u64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordState {
    Pending,
    /// Overdue and confirmed still outstanding; cancellation failed at
    /// least once and will be retried on the next sweep.
    Stale,
    /// A sweep is currently replacing this nonce.
    Cancelling,
}

#[derive(Debug, Clone)]
pub struct PendingRecord {
    pub hash: TxHash,
    pub nonce: u64,
    pub recipient: Address,
    pub submitted_at_ms: u64,
    state: RecordState,
}

/// Tracks broadcast-but-unconfirmed transactions and replaces the ones
/// that outlive the staleness threshold.
///
/// Replacement is the only network-level mechanism to supersede a stuck
/// transaction: a zero-value self-transfer carrying the same nonce at a
/// forced +50% uplift.
pub struct TransactionMonitor<N: Network> {
    network: Arc<N>,
    estimator: FeeEstimator<N>,
    clock: Arc<dyn Clock>,
    staleness: Duration,
    records: Mutex<HashMap<TxHash, PendingRecord>>,
}

impl<N: Network> TransactionMonitor<N> {
    pub fn new(
        network: Arc<N>,
        estimator: FeeEstimator<N>,
        clock: Arc<dyn Clock>,
        staleness: Duration,
    ) -> Self {
        Self {
            network,
            estimator,
            clock,
            staleness,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, hash: TxHash, nonce: u64, recipient: Address) {
        let record = PendingRecord {
            hash,
            nonce,
            recipient,
            submitted_at_ms: self.clock.now_ms(),
            state: RecordState::Pending,
        };
        self.records
            .lock()
            .expect("pending table lock poisoned")
            .insert(hash, record);
    }

    pub fn remove(&self, hash: &TxHash) -> Option<PendingRecord> {
        self.records
            .lock()
            .expect("pending table lock poisoned")
            .remove(hash)
    }

    pub fn pending_count(&self) -> usize {
        self.records
            .lock()
            .expect("pending table lock poisoned")
            .len()
    }

    /// Records past the staleness threshold, not yet picked up by another
    /// sweep.
    fn take_overdue(&self) -> Vec<(TxHash, u64)> {
        let now = self.clock.now_ms();
        let threshold_ms = self.staleness.as_millis() as u64;
        let mut records = self.records.lock().expect("pending table lock poisoned");

        let mut overdue = Vec::new();
        for record in records.values_mut() {
            if record.state == RecordState::Cancelling {
                continue;
            }
            if now.saturating_sub(record.submitted_at_ms) > threshold_ms {
                record.state = RecordState::Cancelling;
                overdue.push((record.hash, record.nonce));
            }
        }
        overdue
    }

    fn settle(&self, hash: &TxHash, cancelled: bool) {
        let mut records = self.records.lock().expect("pending table lock poisoned");
        if cancelled {
            records.remove(hash);
        } else if let Some(record) = records.get_mut(hash) {
            record.state = RecordState::Stale;
        }
    }

    /// Check every overdue record against the chain and replace the ones
    /// still outstanding. Called before each new send. Returns how many
    /// transactions were cancelled.
    pub async fn sweep<A: AccountSigner>(&self, account: &A) -> Result<usize, EngineError> {
        let overdue = self.take_overdue();
        if overdue.is_empty() {
            return Ok(0);
        }

        tracing::warn!(
            count = overdue.len(),
            "found overdue transactions, checking on-chain status"
        );

        let mut cancelled = 0usize;
        for (hash, nonce) in overdue {
            match self.network.transaction_status(hash).await {
                Ok(TxStatus::Mined) | Ok(TxStatus::NotFound) => {
                    // Finished (or evicted) while we weren't looking.
                    self.remove(&hash);
                }
                Ok(TxStatus::Pending) => {
                    tracing::warn!(tx_hash = %hash, nonce, "replacing stuck transaction");
                    match send_replacement(&*self.network, &self.estimator, account, nonce).await {
                        Ok((cancel_hash, _receipt)) => {
                            tracing::info!(
                                tx_hash = %hash,
                                cancel_hash = %cancel_hash,
                                nonce,
                                "stuck transaction cancelled"
                            );
                            self.settle(&hash, true);
                            cancelled += 1;
                        }
                        Err(e) => {
                            tracing::warn!(
                                tx_hash = %hash,
                                nonce,
                                error = %e,
                                "cancellation failed, will retry on next sweep"
                            );
                            self.settle(&hash, false);
                        }
                    }
                }
                Err(e) => {
                    // Status unknown; leave the record for the next sweep.
                    tracing::warn!(tx_hash = %hash, error = %e, "status check failed");
                    self.settle(&hash, false);
                }
            }
        }

        Ok(cancelled)
    }
}

/// Broadcast a zero-value self-transfer at `nonce` with an aggressive fee
/// and wait for it to land. Shared by the monitor and the explicit
/// cancel-nonce flow.
pub async fn send_replacement<N: Network, A: AccountSigner>(
    network: &N,
    estimator: &FeeEstimator<N>,
    account: &A,
    nonce: u64,
) -> Result<(TxHash, ConfirmedReceipt), EngineError> {
    let quote = estimator.quote(CANCEL_UPLIFT_PERCENT).await?;

    let mut request = TransactionRequest::default()
        .with_from(account.address())
        .with_to(account.address())
        .with_value(U256::ZERO)
        .with_input(Bytes::new())
        .with_chain_id(network.chain_id())
        .with_nonce(nonce)
        .with_gas_limit(CANCEL_GAS_LIMIT);

    request = match quote {
        FeeQuote::DynamicFee {
            max_priority_fee_per_gas,
            max_fee_per_gas,
        } => request
            .with_max_priority_fee_per_gas(max_priority_fee_per_gas)
            .with_max_fee_per_gas(max_fee_per_gas),
        FeeQuote::Legacy { gas_price } => request.with_gas_price(gas_price),
    };

    let typed_tx = request
        .build_typed_tx()
        .map_err(|e| EngineError::TransactionBuildFailed {
            message: format!("Failed to build replacement transaction: {e:?}"),
        })?;

    let signed = account.sign_transaction(typed_tx).await?;
    let hash = network.broadcast(signed.into()).await?;
    let receipt = network.wait_for_receipt(hash).await?;

    Ok((hash, receipt))
}
