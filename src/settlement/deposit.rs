//! Deposit Scanner
//!
//! One pass: for every wallet with a deposit address, fetch incoming
//! transactions and settle each unseen one exactly once — dedup key and
//! transaction row first, balance credit second. A duplicate sighting
//! (overlapping pass, next cycle, endpoint replay) loses the dedup insert
//! and is a silent no-op.
//!
//! One wallet's failure never aborts the batch: chain outages and ledger
//! write failures are counted, logged, and retried by the next cycle.

use futures::StreamExt;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::group_by_host;
use crate::chain::AdapterRegistry;
use crate::ledger::{LedgerStore, Wallet, WalletTransaction};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DepositPassSummary {
    pub wallets_scanned: usize,
    pub credited: usize,
    pub duplicates: usize,
    /// Zero-value or not-yet-included transactions.
    pub skipped: usize,
    pub chain_failures: usize,
    pub ledger_failures: usize,
    pub unsupported: usize,
}

impl DepositPassSummary {
    fn merge(&mut self, other: Self) {
        self.wallets_scanned += other.wallets_scanned;
        self.credited += other.credited;
        self.duplicates += other.duplicates;
        self.skipped += other.skipped;
        self.chain_failures += other.chain_failures;
        self.ledger_failures += other.ledger_failures;
        self.unsupported += other.unsupported;
    }
}

pub struct DepositScanner {
    store: Arc<dyn LedgerStore>,
    adapters: Arc<AdapterRegistry>,
    /// Concurrent wallets per chain family; families themselves always run
    /// concurrently. Keeps third-party endpoints under their rate limits.
    concurrency: usize,
}

impl DepositScanner {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        adapters: Arc<AdapterRegistry>,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            adapters,
            concurrency: concurrency.max(1),
        }
    }

    /// Run one complete, self-contained scan over all deposit wallets.
    pub async fn run_pass(&self) -> Result<DepositPassSummary, crate::ledger::LedgerError> {
        let wallets = self.store.wallets_with_deposit_address().await?;
        let (groups, unknown) = group_by_host(wallets, |w: &Wallet| &w.chain_symbol);

        let mut summary = DepositPassSummary {
            unsupported: unknown,
            ..Default::default()
        };

        let family_runs = groups
            .into_values()
            .map(|wallets| self.scan_family(wallets));
        for family_summary in futures::future::join_all(family_runs).await {
            summary.merge(family_summary);
        }

        info!(
            scanned = summary.wallets_scanned,
            credited = summary.credited,
            duplicates = summary.duplicates,
            chain_failures = summary.chain_failures,
            "deposit pass finished"
        );
        Ok(summary)
    }

    async fn scan_family(&self, wallets: Vec<Wallet>) -> DepositPassSummary {
        let mut summary = DepositPassSummary::default();
        let mut results = futures::stream::iter(wallets)
            .map(|wallet| self.scan_wallet(wallet))
            .buffer_unordered(self.concurrency);
        while let Some(wallet_summary) = results.next().await {
            summary.merge(wallet_summary);
        }
        summary
    }

    /// Scan one wallet; all failures are absorbed into the summary.
    async fn scan_wallet(&self, wallet: Wallet) -> DepositPassSummary {
        let mut summary = DepositPassSummary {
            wallets_scanned: 1,
            ..Default::default()
        };

        let Some(address) = wallet.deposit_address.as_deref() else {
            return summary;
        };

        let adapter = match self.adapters.adapter_for(&wallet.chain_symbol) {
            Ok(adapter) => adapter,
            Err(e) => {
                warn!(wallet = wallet.id, symbol = %wallet.chain_symbol, error = %e, "no adapter");
                summary.unsupported += 1;
                return summary;
            }
        };

        let incoming = match adapter.list_incoming(address).await {
            Ok(incoming) => incoming,
            Err(e) => {
                // Retried next cycle; no ledger mutation this cycle.
                warn!(wallet = wallet.id, symbol = %wallet.chain_symbol, error = %e, "chain unavailable");
                summary.chain_failures += 1;
                return summary;
            }
        };

        for tx in incoming {
            if !tx.block_confirmed || tx.value_received <= Decimal::ZERO {
                debug!(tx_hash = %tx.tx_hash, "skipping no-op or unconfirmed transaction");
                summary.skipped += 1;
                continue;
            }

            let record = WalletTransaction::deposit(
                wallet.id,
                &wallet.chain_symbol,
                tx.value_received,
                &tx.tx_hash,
            );

            match self.store.record_settlement(&record).await {
                Ok(false) => {
                    debug!(tx_hash = %tx.tx_hash, symbol = %wallet.chain_symbol, "duplicate event");
                    summary.duplicates += 1;
                }
                Ok(true) => {
                    match self.store.increment_balance(wallet.id, tx.value_received).await {
                        Ok(()) => {
                            info!(
                                wallet = wallet.id,
                                symbol = %wallet.chain_symbol,
                                amount = %tx.value_received,
                                tx_hash = %tx.tx_hash,
                                "deposit credited"
                            );
                            summary.credited += 1;
                        }
                        Err(e) => {
                            // The transaction row is already in the log;
                            // reconciliation re-derives the balance from it.
                            error!(wallet = wallet.id, tx_hash = %tx.tx_hash, error = %e, "credit failed");
                            summary.ledger_failures += 1;
                        }
                    }
                }
                Err(e) => {
                    error!(wallet = wallet.id, tx_hash = %tx.tx_hash, error = %e, "settlement record failed");
                    summary.ledger_failures += 1;
                }
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::MockAdapter;
    use crate::chain::IncomingTx;
    use crate::ledger::memory::MemoryLedger;

    fn incoming(hash: &str, value: Decimal) -> IncomingTx {
        IncomingTx {
            tx_hash: hash.to_string(),
            value_received: value,
            block_confirmed: true,
        }
    }

    fn setup() -> (Arc<MemoryLedger>, Arc<MockAdapter>, DepositScanner) {
        let store = Arc::new(MemoryLedger::new());
        let adapter = Arc::new(MockAdapter::new("BTC"));
        let mut registry = AdapterRegistry::new();
        registry.register("BTC", adapter.clone(), None).unwrap();
        let scanner = DepositScanner::new(store.clone(), Arc::new(registry), 4);
        (store, adapter, scanner)
    }

    #[tokio::test]
    async fn first_sighting_credits_once() {
        let (store, adapter, scanner) = setup();
        let wallet = store.add_wallet(1, "BTC", Some("addr1"));
        adapter.push_incoming("addr1", incoming("tx1", Decimal::new(100_000, 8)));

        let summary = scanner.run_pass().await.unwrap();
        assert_eq!(summary.credited, 1);
        assert_eq!(store.wallet(wallet).unwrap().balance, Decimal::new(100_000, 8));
        assert_eq!(store.deposits_for(wallet).len(), 1);
    }

    #[tokio::test]
    async fn second_pass_is_a_no_op() {
        let (store, adapter, scanner) = setup();
        let wallet = store.add_wallet(1, "BTC", Some("addr1"));
        adapter.push_incoming("addr1", incoming("tx1", Decimal::new(100_000, 8)));

        scanner.run_pass().await.unwrap();
        let summary = scanner.run_pass().await.unwrap();

        assert_eq!(summary.credited, 0);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(store.wallet(wallet).unwrap().balance, Decimal::new(100_000, 8));
        assert_eq!(store.deposits_for(wallet).len(), 1);
    }

    #[tokio::test]
    async fn zero_value_and_unconfirmed_skipped() {
        let (store, adapter, scanner) = setup();
        let wallet = store.add_wallet(1, "BTC", Some("addr1"));
        adapter.push_incoming("addr1", incoming("self_spend", Decimal::ZERO));
        adapter.push_incoming(
            "addr1",
            IncomingTx {
                tx_hash: "mempool_only".to_string(),
                value_received: Decimal::new(1, 2),
                block_confirmed: false,
            },
        );

        let summary = scanner.run_pass().await.unwrap();
        assert_eq!(summary.credited, 0);
        assert_eq!(summary.skipped, 2);
        assert_eq!(store.wallet(wallet).unwrap().balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn chain_outage_mutates_nothing() {
        let (store, adapter, scanner) = setup();
        let wallet = store.add_wallet(1, "BTC", Some("addr1"));
        adapter.push_incoming("addr1", incoming("tx1", Decimal::new(100_000, 8)));
        adapter.set_unavailable(true);

        let summary = scanner.run_pass().await.unwrap();
        assert_eq!(summary.chain_failures, 1);
        assert_eq!(summary.credited, 0);
        assert_eq!(store.wallet(wallet).unwrap().balance, Decimal::ZERO);

        // Next cycle retries cleanly.
        adapter.set_unavailable(false);
        let summary = scanner.run_pass().await.unwrap();
        assert_eq!(summary.credited, 1);
        assert_eq!(store.wallet(wallet).unwrap().balance, Decimal::new(100_000, 8));
    }

    #[tokio::test]
    async fn concurrent_passes_credit_once() {
        let (store, adapter, _) = setup();
        let wallet = store.add_wallet(1, "BTC", Some("addr1"));
        adapter.push_incoming("addr1", incoming("tx1", Decimal::new(100_000, 8)));

        let mut registry = AdapterRegistry::new();
        registry.register("BTC", adapter.clone(), None).unwrap();
        let registry = Arc::new(registry);
        let a = DepositScanner::new(store.clone(), registry.clone(), 4);
        let b = DepositScanner::new(store.clone(), registry, 4);

        let (ra, rb) = tokio::join!(a.run_pass(), b.run_pass());
        let (ra, rb) = (ra.unwrap(), rb.unwrap());

        assert_eq!(ra.credited + rb.credited, 1);
        assert_eq!(store.wallet(wallet).unwrap().balance, Decimal::new(100_000, 8));
        assert_eq!(store.deposits_for(wallet).len(), 1);
    }
}
