use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use alloy::primitives::Address;
use multisend_core::error::EngineError;

use crate::network::Network;

/// Identifies the logical submission attempt holding a nonce claim.
pub type AttemptToken = u64;

const MAX_FETCH_ATTEMPTS: u32 = 8;

#[derive(Default)]
struct AccountNonces {
    /// Nonce -> owning attempt. Keys are the claimed set; the owner tag
    /// lets a release drop only its own claim and lets an attempt detect
    /// that a nonce it held was re-claimed by someone else.
    claimed: BTreeMap<u64, AttemptToken>,
    last_network: u64,
}

/// Per-account nonce bookkeeping for the current run.
///
/// This is the single serialization point for concurrent submissions: the
/// network's pending nonce alone is not enough, because parallel workers on
/// the same account would all be handed the same value. Reservation probes
/// upward from the network nonce past every locally claimed value. Nothing
/// here is persisted; after a restart the ledger rebuilds itself from the
/// network's pending nonce.
pub struct NonceLedger {
    accounts: Mutex<HashMap<Address, AccountNonces>>,
    next_token: AtomicU64,
}

impl Default for NonceLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl NonceLedger {
    pub fn new() -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    pub fn next_token(&self) -> AttemptToken {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }

    /// Reserve the lowest free nonce for `account`, claiming it for
    /// `token`. The network fetch is retried across endpoint rotations a
    /// bounded number of times before the last error propagates.
    pub async fn reserve<N: Network>(
        &self,
        network: &N,
        account: Address,
        token: AttemptToken,
    ) -> Result<u64, EngineError> {
        let mut last_error = None;

        for attempt in 0..MAX_FETCH_ATTEMPTS {
            match network.pending_nonce(account).await {
                Ok(network_nonce) => {
                    let mut accounts = self.accounts.lock().expect("nonce ledger lock poisoned");
                    let entry = accounts.entry(account).or_default();
                    entry.last_network = network_nonce;

                    let mut candidate = network_nonce;
                    while entry.claimed.contains_key(&candidate) {
                        candidate += 1;
                    }
                    entry.claimed.insert(candidate, token);

                    return Ok(candidate);
                }
                Err(e) => {
                    tracing::warn!(
                        account = %account,
                        attempt,
                        error = %e,
                        "nonce fetch failed, rotating endpoint"
                    );
                    network.rotate();
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| EngineError::InternalError {
            message: "nonce reservation retry loop exited without an error".to_string(),
        }))
    }

    /// Drop the claim on `nonce` if it is still held by `token`. Returns
    /// whether a claim was removed. Callers must not release a nonce whose
    /// transaction might still land on-chain.
    pub fn release(&self, account: Address, nonce: u64, token: AttemptToken) -> bool {
        let mut accounts = self.accounts.lock().expect("nonce ledger lock poisoned");
        let Some(entry) = accounts.get_mut(&account) else {
            return false;
        };
        match entry.claimed.get(&nonce) {
            Some(owner) if *owner == token => {
                entry.claimed.remove(&nonce);
                true
            }
            _ => false,
        }
    }

    pub fn held_by(&self, account: Address, nonce: u64, token: AttemptToken) -> bool {
        let accounts = self.accounts.lock().expect("nonce ledger lock poisoned");
        accounts
            .get(&account)
            .and_then(|entry| entry.claimed.get(&nonce))
            .is_some_and(|owner| *owner == token)
    }

    /// Reconcile against the network between batch slices: claims below the
    /// network's pending nonce were consumed by mined transactions and are
    /// dropped.
    pub fn resync(&self, account: Address, network_nonce: u64) {
        let mut accounts = self.accounts.lock().expect("nonce ledger lock poisoned");
        if let Some(entry) = accounts.get_mut(&account) {
            entry.claimed.retain(|nonce, _| *nonce >= network_nonce);
            entry.last_network = network_nonce;
        }
    }

    pub fn claimed_count(&self, account: Address) -> usize {
        let accounts = self.accounts.lock().expect("nonce ledger lock poisoned");
        accounts.get(&account).map_or(0, |entry| entry.claimed.len())
    }
}
