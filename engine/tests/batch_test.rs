
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use fixtures::{MemoryStore, harness, raw_row};
use multisend_core::signer::AccountSigner;
use multisend_engine::batch::{BatchConfig, BatchOrchestrator};
use multisend_engine::store::RowStatus;

const ALICE: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";
const BOB: &str = "0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC";
const CAROL: &str = "0x90F79bf6EB2c4f870365E785982E1f101E93b906";

fn orchestrator(
    h: &fixtures::Harness,
    store: Arc<MemoryStore>,
    batch_size: usize,
) -> (
    BatchOrchestrator<fixtures::MockNetwork, multisend_core::signer::LocalAccount, MemoryStore>,
    Arc<AtomicBool>,
) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let orchestrator = BatchOrchestrator::new(
        h.sender.clone(),
        store,
        BatchConfig::new(batch_size),
        shutdown.clone(),
    );
    (orchestrator, shutdown)
}

#[tokio::test(start_paused = true)]
async fn two_successes_one_terminal_failure() {
    let h = harness();
    // First two broadcasts land; the third row's account runs dry.
    h.network.script_broadcasts([
        None,
        None,
        Some("insufficient funds for gas * price + value"),
    ]);

    let rows = vec![
        raw_row(ALICE, "1.0"),
        raw_row(BOB, "2.0"),
        raw_row(CAROL, "3.0"),
    ];
    let store = Arc::new(MemoryStore::default());
    let (orchestrator, _) = orchestrator(&h, store.clone(), 1);

    let summary = orchestrator.run(&rows).await.unwrap();
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.checkpoint, 3);
    assert!(!summary.interrupted);

    let records = store.records();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].status, RowStatus::Success);
    assert_eq!(records[1].status, RowStatus::Success);
    assert_eq!(records[2].status, RowStatus::Failed);
    assert_eq!(*store.checkpoint.lock().unwrap(), 3);
}

#[tokio::test(start_paused = true)]
async fn broadcast_nonces_are_unique_and_in_row_order() {
    let h = harness();
    let rows = vec![
        raw_row(ALICE, "1"),
        raw_row(BOB, "1"),
        raw_row(CAROL, "1"),
    ];
    let store = Arc::new(MemoryStore::default());
    let (orchestrator, _) = orchestrator(&h, store, 3);

    let summary = orchestrator.run(&rows).await.unwrap();
    assert_eq!(summary.succeeded, 3);

    let nonces: Vec<u64> = h
        .network
        .accepted_broadcasts()
        .iter()
        .map(|b| b.nonce)
        .collect();
    let mut sorted = nonces.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), 3, "nonces must be unique: {nonces:?}");
    // Reservation happens sequentially in row order before the slice runs.
    assert_eq!(nonces, vec![0, 1, 2]);
}

#[tokio::test(start_paused = true)]
async fn resume_from_checkpoint_skips_settled_rows() {
    let h = harness();
    let rows = vec![
        raw_row(ALICE, "1"),
        raw_row(BOB, "1"),
        raw_row(CAROL, "1"),
    ];
    let store = Arc::new(MemoryStore::with_checkpoint(2));
    let (orchestrator, _) = orchestrator(&h, store.clone(), 1);

    let summary = orchestrator.run(&rows).await.unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.checkpoint, 3);

    let records = store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].index, 2);
    assert_eq!(h.network.broadcasts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn duplicate_addresses_are_skipped_after_settling() {
    let h = harness();
    let rows = vec![
        raw_row(ALICE, "1"),
        raw_row(ALICE, "1"),
    ];
    let store = Arc::new(MemoryStore::default());
    let (orchestrator, _) = orchestrator(&h, store.clone(), 1);

    let summary = orchestrator.run(&rows).await.unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(h.network.broadcasts().len(), 1);

    let records = store.records();
    assert_eq!(records[1].status, RowStatus::Skipped);
}

#[tokio::test(start_paused = true)]
async fn malformed_rows_are_skipped_without_consuming_nonces() {
    let h = harness();
    let account = h.sender.account.address();
    let rows = vec![
        raw_row("not-an-address", "1"),
        raw_row(ALICE, "-5"),
        raw_row(BOB, "1"),
    ];
    let store = Arc::new(MemoryStore::default());
    let (orchestrator, _) = orchestrator(&h, store.clone(), 3);

    let summary = orchestrator.run(&rows).await.unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.checkpoint, 3);

    // Only the valid row broadcast; nothing left claimed after resync.
    assert_eq!(h.network.broadcasts().len(), 1);
    assert_eq!(h.ledger.claimed_count(account), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_flag_stops_before_the_next_slice() {
    let h = harness();
    let rows = vec![raw_row(ALICE, "1"), raw_row(BOB, "1")];
    let store = Arc::new(MemoryStore::default());
    let (orchestrator, shutdown) = orchestrator(&h, store.clone(), 1);
    shutdown.store(true, Ordering::SeqCst);

    let summary = orchestrator.run(&rows).await.unwrap();
    assert!(summary.interrupted);
    assert_eq!(summary.succeeded + summary.failed + summary.skipped, 0);
    assert!(h.network.broadcasts().is_empty());
    assert_eq!(*store.checkpoint.lock().unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn ledger_resyncs_between_slices() {
    let h = harness();
    let account = h.sender.account.address();
    let rows = vec![
        raw_row(ALICE, "1"),
        raw_row(BOB, "1"),
    ];
    let store = Arc::new(MemoryStore::default());
    let (orchestrator, _) = orchestrator(&h, store, 1);

    orchestrator.run(&rows).await.unwrap();

    // Confirmed nonces were consumed and reclaimed by the per-slice
    // resync, not released.
    assert_eq!(h.ledger.claimed_count(account), 0);
}
