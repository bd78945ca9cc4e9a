use std::future::Future;
use std::time::Duration;

use alloy::{
    consensus::TxEnvelope,
    primitives::{Address, TxHash, U256},
    providers::Provider,
    rpc::types::{BlockNumberOrTag, TransactionRequest},
    transports::{RpcError, TransportErrorKind},
};
use multisend_core::{
    chain::RpcPool,
    error::{AlloyRpcErrorToEngineError, EngineError},
};

use crate::fees::FeeSnapshot;

/// Where a broadcast transaction currently stands on the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// Known to the network but not yet included in a block.
    Pending,
    /// Included in a block.
    Mined,
    /// The network has no record of the hash.
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmedReceipt {
    pub hash: TxHash,
    /// Execution status: `false` means the transaction was mined but
    /// reverted.
    pub status: bool,
    pub block_number: Option<u64>,
}

/// The blockchain RPC collaborator.
///
/// All engine components talk to the network through this trait so tests
/// can substitute a scripted implementation. `rotate` switches to the next
/// configured endpoint; components call it when they observe a transient
/// failure and then retry.
pub trait Network: Send + Sync + 'static {
    fn chain_id(&self) -> u64;

    fn rotate(&self);

    /// The account's next nonce counting mempool transactions.
    fn pending_nonce(
        &self,
        address: Address,
    ) -> impl Future<Output = Result<u64, EngineError>> + Send;

    /// The account's next nonce counting only mined transactions.
    fn latest_nonce(
        &self,
        address: Address,
    ) -> impl Future<Output = Result<u64, EngineError>> + Send;

    fn fee_snapshot(&self) -> impl Future<Output = Result<FeeSnapshot, EngineError>> + Send;

    fn estimate_gas(
        &self,
        request: &TransactionRequest,
    ) -> impl Future<Output = Result<u64, EngineError>> + Send;

    fn broadcast(
        &self,
        tx: TxEnvelope,
    ) -> impl Future<Output = Result<TxHash, EngineError>> + Send;

    fn transaction_status(
        &self,
        hash: TxHash,
    ) -> impl Future<Output = Result<TxStatus, EngineError>> + Send;

    /// Wait until the transaction is mined. There is deliberately no
    /// in-process deadline here; stuck transactions are detected and
    /// replaced by the monitor instead of by timing out the wait.
    fn wait_for_receipt(
        &self,
        hash: TxHash,
    ) -> impl Future<Output = Result<ConfirmedReceipt, EngineError>> + Send;

    fn balance(&self, address: Address) -> impl Future<Output = Result<U256, EngineError>> + Send;
}

/// `Network` over HTTP JSON-RPC endpoints with round-robin failover.
pub struct HttpNetwork {
    pool: RpcPool,
    chain_id: u64,
    confirmation_poll: Duration,
}

impl HttpNetwork {
    pub fn new(pool: RpcPool, chain_id: u64, confirmation_poll: Duration) -> Self {
        Self {
            pool,
            chain_id,
            confirmation_poll,
        }
    }

    fn rpc_url(&self) -> String {
        self.pool.current_url().to_string()
    }

    fn map_err(&self, e: RpcError<TransportErrorKind>) -> EngineError {
        e.to_engine_error(&self.rpc_url())
    }
}

fn is_eip1559_unsupported(error: &RpcError<TransportErrorKind>) -> bool {
    match error {
        RpcError::ErrorResp(payload) => {
            let message = payload.message.to_lowercase();
            payload.code == -32601
                || message.contains("method not found")
                || message.contains("not supported")
                || message.contains("unsupported")
        }
        RpcError::UnsupportedFeature(_) => true,
        _ => false,
    }
}

impl Network for HttpNetwork {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn rotate(&self) {
        self.pool.rotate();
    }

    async fn pending_nonce(&self, address: Address) -> Result<u64, EngineError> {
        self.pool
            .current()
            .get_transaction_count(address)
            .pending()
            .await
            .map_err(|e| self.map_err(e))
    }

    async fn latest_nonce(&self, address: Address) -> Result<u64, EngineError> {
        self.pool
            .current()
            .get_transaction_count(address)
            .latest()
            .await
            .map_err(|e| self.map_err(e))
    }

    async fn fee_snapshot(&self) -> Result<FeeSnapshot, EngineError> {
        let provider = self.pool.current();

        let base_fee_per_gas = provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await
            .map_err(|e| self.map_err(e))?
            .and_then(|block| block.header.base_fee_per_gas)
            .map(u128::from);

        match provider.estimate_eip1559_fees().await {
            Ok(fees) => Ok(FeeSnapshot {
                base_fee_per_gas,
                max_priority_fee_per_gas: Some(fees.max_priority_fee_per_gas),
                max_fee_per_gas: Some(fees.max_fee_per_gas),
                gas_price: None,
            }),
            Err(e) if is_eip1559_unsupported(&e) => {
                tracing::debug!("EIP-1559 fee data unavailable, falling back to gas price");
                let gas_price = provider.get_gas_price().await.map_err(|e| self.map_err(e))?;
                Ok(FeeSnapshot {
                    base_fee_per_gas: None,
                    max_priority_fee_per_gas: None,
                    max_fee_per_gas: None,
                    gas_price: Some(gas_price),
                })
            }
            Err(e) => Err(self.map_err(e)),
        }
    }

    async fn estimate_gas(&self, request: &TransactionRequest) -> Result<u64, EngineError> {
        self.pool
            .current()
            .estimate_gas(request.clone())
            .await
            .map_err(|e| self.map_err(e))
    }

    async fn broadcast(&self, tx: TxEnvelope) -> Result<TxHash, EngineError> {
        self.pool
            .current()
            .send_tx_envelope(tx)
            .await
            .map(|pending| *pending.tx_hash())
            .map_err(|e| self.map_err(e))
    }

    async fn transaction_status(&self, hash: TxHash) -> Result<TxStatus, EngineError> {
        let tx = self
            .pool
            .current()
            .get_transaction_by_hash(hash)
            .await
            .map_err(|e| self.map_err(e))?;

        Ok(match tx {
            Some(tx) if tx.block_number.is_some() => TxStatus::Mined,
            Some(_) => TxStatus::Pending,
            None => TxStatus::NotFound,
        })
    }

    async fn wait_for_receipt(&self, hash: TxHash) -> Result<ConfirmedReceipt, EngineError> {
        // Tolerate transient poll failures by rotating; give up only after a
        // full sweep of the pool keeps failing.
        let max_consecutive_errors = (self.pool.len() * 2).max(4);
        let mut consecutive_errors = 0usize;

        loop {
            match self.pool.current().get_transaction_receipt(hash).await {
                Ok(Some(receipt)) => {
                    return Ok(ConfirmedReceipt {
                        hash,
                        status: receipt.status(),
                        block_number: receipt.block_number,
                    });
                }
                Ok(None) => {
                    consecutive_errors = 0;
                }
                Err(e) => {
                    consecutive_errors += 1;
                    if consecutive_errors >= max_consecutive_errors {
                        return Err(self.map_err(e));
                    }
                    tracing::warn!(
                        tx_hash = %hash,
                        error = %e,
                        "receipt poll failed, rotating endpoint"
                    );
                    self.pool.rotate();
                }
            }

            tokio::time::sleep(self.confirmation_poll).await;
        }
    }

    async fn balance(&self, address: Address) -> Result<U256, EngineError> {
        self.pool
            .current()
            .get_balance(address)
            .await
            .map_err(|e| self.map_err(e))
    }
}
