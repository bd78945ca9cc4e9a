use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use alloy::primitives::Address;
use futures::future;
use multisend_core::{error::EngineError, signer::AccountSigner};
use rand::Rng;

use crate::network::Network;
use crate::rows::{RawRow, Recipient, validate_row};
use crate::sender::{ReservedNonce, SubmissionOutcome, TransferSender};
use crate::store::{ResultRecord, RowStatus, StateStore};

/// Pause applied between batch slices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DelayPolicy {
    None,
    Fixed(Duration),
    Random { min: Duration, max: Duration },
}

impl DelayPolicy {
    fn pick(&self) -> Option<Duration> {
        match self {
            DelayPolicy::None => None,
            DelayPolicy::Fixed(d) => Some(*d),
            DelayPolicy::Random { min, max } => {
                let (lo, hi) = (min.as_millis() as u64, max.as_millis() as u64);
                let ms = if hi > lo {
                    rand::rng().random_range(lo..=hi)
                } else {
                    lo
                };
                Some(Duration::from_millis(ms))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Rows submitted concurrently per slice.
    pub batch_size: usize,
    pub delay: DelayPolicy,
}

impl BatchConfig {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.clamp(1, 100),
            delay: DelayPolicy::None,
        }
    }

    pub fn with_delay(mut self, delay: DelayPolicy) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Offset the checkpoint ended at.
    pub checkpoint: usize,
    pub interrupted: bool,
}

/// Drives the recipient list through the retry state machine in bounded
/// concurrent slices, checkpointing after each slice so a restart resumes
/// where the previous run stopped.
pub struct BatchOrchestrator<N: Network, A: AccountSigner, S: StateStore> {
    sender: Arc<TransferSender<N, A>>,
    store: Arc<S>,
    config: BatchConfig,
    shutdown: Arc<AtomicBool>,
}

enum PreparedRow {
    Submit(usize, Recipient, ReservedNonce),
    Settled(ResultRecord),
}

impl<N: Network, A: AccountSigner, S: StateStore> BatchOrchestrator<N, A, S> {
    pub fn new(
        sender: Arc<TransferSender<N, A>>,
        store: Arc<S>,
        config: BatchConfig,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            sender,
            store,
            config,
            shutdown,
        }
    }

    pub async fn run(&self, rows: &[RawRow]) -> Result<BatchSummary, EngineError> {
        let total = rows.len();
        let mut offset = self.store.read_checkpoint()?;
        if offset > 0 {
            tracing::info!(offset, total, "resuming from checkpoint");
        }

        let account = self.sender.account.address();
        let mut summary = BatchSummary {
            checkpoint: offset,
            ..BatchSummary::default()
        };
        // Once an address has terminally settled in this run, later
        // duplicates are skipped instead of resubmitted.
        let mut session_succeeded: HashSet<Address> = HashSet::new();
        let mut session_failed: HashSet<Address> = HashSet::new();

        while offset < total {
            if self.shutdown.load(Ordering::SeqCst) {
                tracing::warn!(offset, "interrupt received, stopping before next slice");
                summary.interrupted = true;
                break;
            }

            let end = (offset + self.config.batch_size).min(total);
            let slice = &rows[offset..end];

            let mut prepared = Vec::with_capacity(slice.len());
            for (i, raw) in slice.iter().enumerate() {
                let index = offset + i;
                prepared.push(
                    self.prepare_row(index, raw, account, &session_succeeded, &session_failed)
                        .await,
                );
            }

            let submissions = prepared.into_iter().map(|row| async move {
                match row {
                    PreparedRow::Settled(record) => record,
                    PreparedRow::Submit(index, recipient, reserved) => {
                        let outcome = self.sender.submit(&recipient, reserved).await;
                        result_record(index, &recipient, outcome)
                    }
                }
            });
            let records = future::join_all(submissions).await;

            for record in &records {
                match record.status {
                    RowStatus::Success => {
                        summary.succeeded += 1;
                        if let Ok(address) = record.address.parse() {
                            session_succeeded.insert(address);
                        }
                    }
                    RowStatus::Failed => {
                        summary.failed += 1;
                        if let Ok(address) = record.address.parse() {
                            session_failed.insert(address);
                        }
                    }
                    RowStatus::Skipped => summary.skipped += 1,
                }
                self.store.append_result(record)?;
            }

            // Correct for drift before handing out the next slice's nonces.
            match self.sender.network.pending_nonce(account).await {
                Ok(network_nonce) => self.sender.ledger.resync(account, network_nonce),
                Err(e) => {
                    tracing::warn!(error = %e, "nonce resync failed, rotating endpoint");
                    self.sender.network.rotate();
                }
            }

            self.store.write_checkpoint(end)?;
            summary.checkpoint = end;
            offset = end;

            tracing::info!(
                processed = offset,
                total,
                percent = (offset * 100) / total.max(1),
                succeeded = summary.succeeded,
                failed = summary.failed,
                "slice complete"
            );

            if offset < total
                && !self.shutdown.load(Ordering::SeqCst)
                && let Some(delay) = self.config.delay.pick()
            {
                tracing::debug!(delay_ms = delay.as_millis() as u64, "inter-slice delay");
                tokio::time::sleep(delay).await;
            }
        }

        Ok(summary)
    }

    async fn prepare_row(
        &self,
        index: usize,
        raw: &RawRow,
        account: Address,
        session_succeeded: &HashSet<Address>,
        session_failed: &HashSet<Address>,
    ) -> PreparedRow {
        let recipient = match validate_row(raw) {
            Ok(recipient) => recipient,
            Err(e) => {
                tracing::warn!(index, error = %e, "skipping malformed row");
                return PreparedRow::Settled(ResultRecord {
                    index,
                    address: raw.address.clone(),
                    amount: raw.amount.clone(),
                    status: RowStatus::Skipped,
                    tx_hash: None,
                    detail: Some(e.to_string()),
                });
            }
        };

        if session_succeeded.contains(&recipient.address)
            || session_failed.contains(&recipient.address)
        {
            tracing::warn!(
                index,
                recipient = %recipient.address,
                "address already settled this run, skipping duplicate"
            );
            return PreparedRow::Settled(ResultRecord {
                index,
                address: raw.address.clone(),
                amount: raw.amount.clone(),
                status: RowStatus::Skipped,
                tx_hash: None,
                detail: Some("duplicate of an already settled address".to_string()),
            });
        }

        // Nonces are reserved sequentially in row order, so within a slice
        // they come out strictly increasing even though the submissions
        // themselves run concurrently.
        let token = self.sender.ledger.next_token();
        match self
            .sender
            .ledger
            .reserve(&*self.sender.network, account, token)
            .await
        {
            Ok(nonce) => PreparedRow::Submit(index, recipient, ReservedNonce { nonce, token }),
            Err(e) => PreparedRow::Settled(ResultRecord {
                index,
                address: raw.address.clone(),
                amount: raw.amount.clone(),
                status: RowStatus::Failed,
                tx_hash: None,
                detail: Some(format!("nonce reservation failed: {e}")),
            }),
        }
    }
}

fn result_record(index: usize, recipient: &Recipient, outcome: SubmissionOutcome) -> ResultRecord {
    match outcome {
        SubmissionOutcome::Confirmed { tx_hash, .. } => ResultRecord {
            index,
            address: recipient.address.to_string(),
            amount: recipient.amount_display.clone(),
            status: RowStatus::Success,
            tx_hash: Some(tx_hash.to_string()),
            detail: None,
        },
        SubmissionOutcome::Failed { error } => ResultRecord {
            index,
            address: recipient.address.to_string(),
            amount: recipient.amount_display.clone(),
            status: RowStatus::Failed,
            tx_hash: None,
            detail: Some(error),
        },
    }
}
