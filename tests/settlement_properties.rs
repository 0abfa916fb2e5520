//! End-to-end settlement scenarios over the in-memory ledger and scripted
//! chain adapters: full deposit and withdrawal lifecycles, duplicate
//! sightings under overlapping passes, per-chain failure isolation, and
//! the recomputability of every balance from the transaction log.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;

use chainsettle::chain::mock::MockAdapter;
use chainsettle::chain::{AdapterRegistry, IncomingTx};
use chainsettle::ledger::memory::MemoryLedger;
use chainsettle::ledger::{LedgerStore, TxStatus, WalletTransaction};
use chainsettle::settlement::withdrawal::DEFAULT_GRACE_SECS;
use chainsettle::settlement::{DepositScanner, Reconciler, WithdrawalTracker};

fn btc(sats: i64) -> Decimal {
    Decimal::new(sats, 8)
}

fn eth(milli: i64) -> Decimal {
    Decimal::new(milli, 3)
}

fn confirmed(hash: &str, value: Decimal) -> IncomingTx {
    IncomingTx {
        tx_hash: hash.to_string(),
        value_received: value,
        block_confirmed: true,
    }
}

struct Harness {
    store: Arc<MemoryLedger>,
    registry: Arc<AdapterRegistry>,
    adapters: Vec<Arc<MockAdapter>>,
}

fn harness(symbols: &[&str]) -> Harness {
    let store = Arc::new(MemoryLedger::new());
    let mut registry = AdapterRegistry::new();
    let mut adapters = Vec::new();
    for symbol in symbols {
        let adapter = Arc::new(MockAdapter::new(symbol));
        registry.register(symbol, adapter.clone(), None).unwrap();
        adapters.push(adapter);
    }
    Harness {
        store,
        registry: Arc::new(registry),
        adapters,
    }
}

impl Harness {
    fn scanner(&self) -> DepositScanner {
        DepositScanner::new(self.store.clone(), self.registry.clone(), 4)
    }

    fn tracker(&self) -> WithdrawalTracker {
        WithdrawalTracker::new(self.store.clone(), self.registry.clone(), 4, DEFAULT_GRACE_SECS)
    }
}

#[tokio::test]
async fn btc_deposit_lifecycle() {
    let h = harness(&["BTC"]);
    let wallet = h.store.add_wallet(7, "BTC", Some("bc1qdeposit"));
    h.adapters[0].push_incoming("bc1qdeposit", confirmed("f4a1...be", btc(100_000)));

    // First sighting settles and credits 0.001 BTC.
    let summary = h.scanner().run_pass().await.unwrap();
    assert_eq!(summary.credited, 1);
    assert_eq!(h.store.wallet(wallet).unwrap().balance, btc(100_000));

    let deposits = h.store.deposits_for(wallet);
    assert_eq!(deposits.len(), 1);
    assert_eq!(deposits[0].status, TxStatus::Completed);
    assert_eq!(deposits[0].amount, btc(100_000));
    assert!(deposits[0].completed_at.is_some());

    // Every later cycle re-observes the same transaction and does nothing.
    for _ in 0..3 {
        h.scanner().run_pass().await.unwrap();
    }
    assert_eq!(h.store.wallet(wallet).unwrap().balance, btc(100_000));
    assert_eq!(h.store.deposits_for(wallet).len(), 1);

    // The ledger agrees with its own transaction log.
    let reconciler = Reconciler::new(h.store.clone());
    assert!(reconciler.run_pass().await.unwrap().is_empty());
}

#[tokio::test]
async fn eth_withdrawal_lifecycle() {
    let h = harness(&["ETH"]);
    let wallet = h.store.add_wallet(3, "ETH", None);
    // 1.0 ETH + 0.002 fee already moved from balance into the lock.
    h.store.set_balances(wallet, eth(500), eth(1_002));
    let tx = WalletTransaction::pending_withdrawal(wallet, "ETH", eth(1_000), eth(2), "0xbroadcast");
    h.store.insert_transaction(&tx).await.unwrap();

    // 5 confirmations: progress recorded, nothing released.
    h.adapters[0].set_confirmations("0xbroadcast", 5, true);
    let summary = h.tracker().run_pass().await.unwrap();
    assert_eq!(summary.still_pending, 1);
    let stored = h.store.transaction(tx.id).unwrap();
    assert_eq!(stored.status, TxStatus::Pending);
    assert_eq!(stored.confirmations, 5);
    assert_eq!(h.store.wallet(wallet).unwrap().locked_balance, eth(1_002));

    // 14 confirmations crosses ETH's threshold of 12.
    h.adapters[0].set_confirmations("0xbroadcast", 14, true);
    let summary = h.tracker().run_pass().await.unwrap();
    assert_eq!(summary.completed, 1);

    let stored = h.store.transaction(tx.id).unwrap();
    assert_eq!(stored.status, TxStatus::Completed);
    assert_eq!(stored.confirmations, 14);
    assert!(stored.completed_at.is_some());
    let w = h.store.wallet(wallet).unwrap();
    assert_eq!(w.balance, eth(500));
    assert_eq!(w.locked_balance, Decimal::ZERO);

    // A straggler pass observing the same depth changes nothing.
    let summary = h.tracker().run_pass().await.unwrap();
    assert_eq!(summary.completed, 0);
    assert_eq!(h.store.wallet(wallet).unwrap().locked_balance, Decimal::ZERO);
}

#[tokio::test]
async fn unresolved_withdrawal_restores_funds() {
    let h = harness(&["ETH"]);
    let wallet = h.store.add_wallet(3, "ETH", None);
    h.store.set_balances(wallet, Decimal::ZERO, eth(1_002));
    let mut tx =
        WalletTransaction::pending_withdrawal(wallet, "ETH", eth(1_000), eth(2), "0xnever");
    tx.created_at = Utc::now() - Duration::hours(2);
    h.store.insert_transaction(&tx).await.unwrap();

    let summary = h.tracker().run_pass().await.unwrap();
    assert_eq!(summary.failed, 1);

    assert_eq!(h.store.transaction(tx.id).unwrap().status, TxStatus::Failed);
    let w = h.store.wallet(wallet).unwrap();
    assert_eq!(w.balance, eth(1_002));
    assert_eq!(w.locked_balance, Decimal::ZERO);

    // Failed withdrawals drop out of the log's expected balance, so the
    // restored wallet still reconciles cleanly.
    let reconciler = Reconciler::new(h.store.clone());
    assert!(reconciler.run_pass().await.unwrap().is_empty());
}

#[tokio::test]
async fn overlapping_scans_settle_each_event_once() {
    let h = harness(&["BTC"]);
    let wallet = h.store.add_wallet(1, "BTC", Some("bc1qaddr"));
    for i in 0..10 {
        h.adapters[0].push_incoming("bc1qaddr", confirmed(&format!("tx{i}"), btc(10_000)));
    }

    let a = h.scanner();
    let b = h.scanner();
    let c = h.scanner();
    let (ra, rb, rc) = tokio::join!(a.run_pass(), b.run_pass(), c.run_pass());
    let total = ra.unwrap().credited + rb.unwrap().credited + rc.unwrap().credited;

    assert_eq!(total, 10);
    assert_eq!(h.store.wallet(wallet).unwrap().balance, btc(100_000));
    assert_eq!(h.store.deposits_for(wallet).len(), 10);
}

#[tokio::test]
async fn one_chain_down_never_blocks_the_others() {
    let h = harness(&["BTC", "SOL"]);
    let btc_wallet = h.store.add_wallet(1, "BTC", Some("bc1qup"));
    let sol_wallet = h.store.add_wallet(1, "SOL", Some("soladdr"));
    h.adapters[0].push_incoming("bc1qup", confirmed("btctx", btc(50_000)));
    h.adapters[1].push_incoming("soladdr", confirmed("solsig", Decimal::new(2, 0)));
    h.adapters[1].set_unavailable(true);

    let summary = h.scanner().run_pass().await.unwrap();
    assert_eq!(summary.credited, 1);
    assert_eq!(summary.chain_failures, 1);
    assert_eq!(h.store.wallet(btc_wallet).unwrap().balance, btc(50_000));
    assert_eq!(h.store.wallet(sol_wallet).unwrap().balance, Decimal::ZERO);

    // Outage over: the missed deposit settles on the next cycle.
    h.adapters[1].set_unavailable(false);
    let summary = h.scanner().run_pass().await.unwrap();
    assert_eq!(summary.credited, 1);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(h.store.wallet(sol_wallet).unwrap().balance, Decimal::new(2, 0));
}

#[tokio::test]
async fn same_hash_on_two_chains_is_two_events() {
    let h = harness(&["ETH", "BNB"]);
    let eth_wallet = h.store.add_wallet(1, "ETH", Some("0xsame"));
    let bnb_wallet = h.store.add_wallet(1, "BNB", Some("0xsame"));
    h.adapters[0].push_incoming("0xsame", confirmed("0xcollide", eth(1_000)));
    h.adapters[1].push_incoming("0xsame", confirmed("0xcollide", eth(3_000)));

    let summary = h.scanner().run_pass().await.unwrap();
    assert_eq!(summary.credited, 2);
    assert_eq!(h.store.wallet(eth_wallet).unwrap().balance, eth(1_000));
    assert_eq!(h.store.wallet(bnb_wallet).unwrap().balance, eth(3_000));
}

#[tokio::test]
async fn balances_recompute_from_the_log_after_mixed_activity() {
    let h = harness(&["BTC"]);
    let wallet = h.store.add_wallet(9, "BTC", Some("bc1qmix"));

    // Two deposits settle.
    h.adapters[0].push_incoming("bc1qmix", confirmed("d1", btc(300_000)));
    h.adapters[0].push_incoming("bc1qmix", confirmed("d2", btc(200_000)));
    h.scanner().run_pass().await.unwrap();

    // One withdrawal of 0.001 + 0.0001 fee is initiated and completes.
    let spend = btc(100_000) + btc(10_000);
    h.store.increment_balance(wallet, -spend).await.unwrap();
    h.store.adjust_locked_balance(wallet, spend).await.unwrap();
    let tx = WalletTransaction::pending_withdrawal(wallet, "BTC", btc(100_000), btc(10_000), "w1");
    h.store.insert_transaction(&tx).await.unwrap();
    h.adapters[0].set_confirmations("w1", 3, true);
    h.tracker().run_pass().await.unwrap();

    let w = h.store.wallet(wallet).unwrap();
    assert_eq!(w.balance, btc(390_000));
    assert_eq!(w.locked_balance, Decimal::ZERO);

    let reconciler = Reconciler::new(h.store.clone());
    assert!(reconciler.run_pass().await.unwrap().is_empty());
}
