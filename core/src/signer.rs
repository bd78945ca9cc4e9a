use alloy::{
    consensus::{SignableTransaction, Signed, TypedTransaction},
    network::TxSigner,
    primitives::Address,
    signers::local::PrivateKeySigner,
};

use crate::error::EngineError;

/// Signing capability for one account.
///
/// The engine never touches raw key material beyond this trait: it hands a
/// fully built transaction in and gets signed bytes back.
pub trait AccountSigner: Send + Sync + 'static {
    fn address(&self) -> Address;

    fn sign_transaction(
        &self,
        tx: TypedTransaction,
    ) -> impl std::future::Future<Output = Result<Signed<TypedTransaction>, EngineError>> + Send;
}

/// An account backed by an in-process private key.
#[derive(Clone)]
pub struct LocalAccount {
    address: Address,
    inner: PrivateKeySigner,
}

impl LocalAccount {
    pub fn from_private_key(key: &str) -> Result<Self, EngineError> {
        let inner: PrivateKeySigner =
            key.trim()
                .parse()
                .map_err(|e| EngineError::SigningError {
                    message: format!("Failed to parse private key: {e}"),
                })?;

        Ok(Self {
            address: inner.address(),
            inner,
        })
    }
}

impl AccountSigner for LocalAccount {
    fn address(&self) -> Address {
        self.address
    }

    fn sign_transaction(
        &self,
        mut tx: TypedTransaction,
    ) -> impl std::future::Future<Output = Result<Signed<TypedTransaction>, EngineError>> + Send
    {
        async move {
            let signature = TxSigner::sign_transaction(&self.inner, &mut tx)
                .await
                .map_err(|e| EngineError::SigningError {
                    message: format!("Failed to sign transaction: {e}"),
                })?;

            Ok(tx.into_signed(signature))
        }
    }
}
