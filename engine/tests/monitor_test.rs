
use std::time::Duration;

use alloy::primitives::TxHash;
use fixtures::harness;
use multisend_core::signer::AccountSigner;
use multisend_engine::network::TxStatus;

fn hash(byte: u8) -> TxHash {
    TxHash::repeat_byte(byte)
}

#[tokio::test(start_paused = true)]
async fn not_yet_stale_at_threshold_minus_one() {
    let h = harness();
    let account = h.sender.account.address();

    h.monitor.register(hash(1), 5, account);
    h.clock.advance(Duration::from_secs(179));

    let cancelled = h.monitor.sweep(&*h.sender.account).await.unwrap();
    assert_eq!(cancelled, 0);
    assert_eq!(h.monitor.pending_count(), 1);
    assert!(h.network.broadcasts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stale_past_threshold_gets_replaced() {
    let h = harness();
    let account = h.sender.account.address();

    h.monitor.register(hash(1), 5, account);
    h.network.set_status(hash(1), TxStatus::Pending);
    h.clock.advance(Duration::from_secs(181));

    let cancelled = h.monitor.sweep(&*h.sender.account).await.unwrap();
    assert_eq!(cancelled, 1);
    assert_eq!(h.monitor.pending_count(), 0);

    // The replacement is a zero-value self-transfer at the stuck nonce.
    let broadcasts = h.network.accepted_broadcasts();
    assert_eq!(broadcasts.len(), 1);
    assert_eq!(broadcasts[0].nonce, 5);
    assert_eq!(broadcasts[0].to.unwrap(), account);
    assert!(broadcasts[0].value.is_zero());
}

#[tokio::test(start_paused = true)]
async fn replacement_outbids_the_market() {
    let h = harness();
    let account = h.sender.account.address();

    h.monitor.register(hash(1), 9, account);
    h.network.set_status(hash(1), TxStatus::Pending);
    h.clock.advance(Duration::from_secs(200));

    h.monitor.sweep(&*h.sender.account).await.unwrap();

    let broadcasts = h.network.accepted_broadcasts();
    assert_eq!(broadcasts.len(), 1);
    // +50% forced uplift over the 1 gwei market tip.
    assert_eq!(broadcasts[0].max_priority_fee_per_gas, Some(1_500_000_000));
}

#[tokio::test(start_paused = true)]
async fn mined_or_evicted_records_are_dropped_without_cancelling() {
    let h = harness();
    let account = h.sender.account.address();

    h.monitor.register(hash(1), 5, account);
    h.monitor.register(hash(2), 6, account);
    h.network.set_status(hash(1), TxStatus::Mined);
    // hash(2) stays NotFound: evicted from the pool.
    h.clock.advance(Duration::from_secs(300));

    let cancelled = h.monitor.sweep(&*h.sender.account).await.unwrap();
    assert_eq!(cancelled, 0);
    assert_eq!(h.monitor.pending_count(), 0);
    assert!(h.network.broadcasts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_cancellation_is_retried_on_the_next_sweep() {
    let h = harness();
    let account = h.sender.account.address();

    h.monitor.register(hash(1), 5, account);
    h.network.set_status(hash(1), TxStatus::Pending);
    h.clock.advance(Duration::from_secs(200));

    // First sweep: the replacement broadcast itself is rejected.
    h.network.script_broadcasts([Some("txpool is full")]);
    let cancelled = h.monitor.sweep(&*h.sender.account).await.unwrap();
    assert_eq!(cancelled, 0);
    assert_eq!(h.monitor.pending_count(), 1);

    // Second sweep succeeds; there is no retry cap on cancellations.
    let cancelled = h.monitor.sweep(&*h.sender.account).await.unwrap();
    assert_eq!(cancelled, 1);
    assert_eq!(h.monitor.pending_count(), 0);
}
