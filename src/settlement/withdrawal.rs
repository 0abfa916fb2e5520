//! Withdrawal Confirmation Tracker
//!
//! One pass: for every pending withdrawal with a transaction hash, refresh
//! its confirmation depth and advance the state machine:
//!
//! `pending → completed` once depth reaches the chain's threshold (lock
//! released), or `pending → failed` when the hash stays unknown on-chain
//! past the grace window (funds restored). Both transitions are terminal
//! and one-way; the store's pending-only update plus the locked-balance
//! floor make a duplicate concurrent pass a safe no-op.

use chrono::{TimeDelta, Utc};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::group_by_host;
use crate::chain::AdapterRegistry;
use crate::ledger::{LedgerStore, TxStatus, WalletTransaction};

/// How long an unfound withdrawal hash stays pending before it is written
/// off as invalid and the funds restored. Distinguishes "not yet indexed"
/// from "genuinely invalid".
pub const DEFAULT_GRACE_SECS: i64 = 3600;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WithdrawalPassSummary {
    pub tracked: usize,
    pub completed: usize,
    pub failed: usize,
    pub still_pending: usize,
    pub chain_failures: usize,
    pub ledger_failures: usize,
    pub unsupported: usize,
}

impl WithdrawalPassSummary {
    fn merge(&mut self, other: Self) {
        self.tracked += other.tracked;
        self.completed += other.completed;
        self.failed += other.failed;
        self.still_pending += other.still_pending;
        self.chain_failures += other.chain_failures;
        self.ledger_failures += other.ledger_failures;
        self.unsupported += other.unsupported;
    }
}

pub struct WithdrawalTracker {
    store: Arc<dyn LedgerStore>,
    adapters: Arc<AdapterRegistry>,
    concurrency: usize,
    grace: TimeDelta,
}

impl WithdrawalTracker {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        adapters: Arc<AdapterRegistry>,
        concurrency: usize,
        grace_secs: i64,
    ) -> Self {
        Self {
            store,
            adapters,
            concurrency: concurrency.max(1),
            grace: TimeDelta::seconds(grace_secs.max(0)),
        }
    }

    /// Run one complete pass over all outstanding withdrawals.
    pub async fn run_pass(&self) -> Result<WithdrawalPassSummary, crate::ledger::LedgerError> {
        let pending = self.store.pending_withdrawals().await?;
        let (groups, unknown) =
            group_by_host(pending, |tx: &WalletTransaction| &tx.chain_symbol);

        let mut summary = WithdrawalPassSummary {
            unsupported: unknown,
            ..Default::default()
        };

        let family_runs = groups.into_values().map(|txs| self.track_family(txs));
        for family_summary in futures::future::join_all(family_runs).await {
            summary.merge(family_summary);
        }

        info!(
            tracked = summary.tracked,
            completed = summary.completed,
            failed = summary.failed,
            still_pending = summary.still_pending,
            chain_failures = summary.chain_failures,
            "withdrawal pass finished"
        );
        Ok(summary)
    }

    async fn track_family(&self, txs: Vec<WalletTransaction>) -> WithdrawalPassSummary {
        let mut summary = WithdrawalPassSummary::default();
        let mut results = futures::stream::iter(txs)
            .map(|tx| self.track_one(tx))
            .buffer_unordered(self.concurrency);
        while let Some(item_summary) = results.next().await {
            summary.merge(item_summary);
        }
        summary
    }

    async fn track_one(&self, tx: WalletTransaction) -> WithdrawalPassSummary {
        let mut summary = WithdrawalPassSummary {
            tracked: 1,
            ..Default::default()
        };

        let Some(hash) = tx.tx_hash.clone() else {
            return summary;
        };

        let (adapter, threshold) = match (
            self.adapters.adapter_for(&tx.chain_symbol),
            self.adapters.required_confirmations(&tx.chain_symbol),
        ) {
            (Ok(adapter), Ok(threshold)) => (adapter, threshold),
            _ => {
                warn!(tx = %tx.id, symbol = %tx.chain_symbol, "no adapter for withdrawal");
                summary.unsupported += 1;
                return summary;
            }
        };

        let observed = match adapter.get_confirmations(&hash).await {
            Ok(observed) => observed,
            Err(e) => {
                warn!(tx = %tx.id, symbol = %tx.chain_symbol, error = %e, "chain unavailable");
                summary.chain_failures += 1;
                return summary;
            }
        };

        if !observed.found {
            self.handle_not_found(&tx, &mut summary).await;
            return summary;
        }

        if observed.confirmations >= threshold {
            self.complete(&tx, observed.confirmations, &mut summary).await;
        } else {
            // Persist progress unconditionally for observability.
            match self
                .store
                .update_transaction_status(tx.id, TxStatus::Pending, observed.confirmations, None)
                .await
            {
                Ok(_) => {
                    debug!(
                        tx = %tx.id,
                        confirmations = observed.confirmations,
                        threshold,
                        "withdrawal still confirming"
                    );
                    summary.still_pending += 1;
                }
                Err(e) => {
                    error!(tx = %tx.id, error = %e, "confirmation update failed");
                    summary.ledger_failures += 1;
                }
            }
        }

        summary
    }

    async fn complete(
        &self,
        tx: &WalletTransaction,
        confirmations: u32,
        summary: &mut WithdrawalPassSummary,
    ) {
        let transitioned = match self
            .store
            .update_transaction_status(tx.id, TxStatus::Completed, confirmations, Some(Utc::now()))
            .await
        {
            Ok(transitioned) => transitioned,
            Err(e) => {
                error!(tx = %tx.id, error = %e, "completion update failed");
                summary.ledger_failures += 1;
                return;
            }
        };
        if !transitioned {
            // Another pass finalized it first.
            debug!(tx = %tx.id, "withdrawal already resolved");
            return;
        }

        let locked = tx.amount + tx.fee;
        match self.store.adjust_locked_balance(tx.wallet_id, -locked).await {
            Ok(()) => {
                info!(
                    tx = %tx.id,
                    wallet = tx.wallet_id,
                    symbol = %tx.chain_symbol,
                    amount = %tx.amount,
                    confirmations,
                    "withdrawal completed, lock released"
                );
                summary.completed += 1;
            }
            Err(e) => {
                error!(tx = %tx.id, error = %e, "lock release failed");
                summary.ledger_failures += 1;
            }
        }
    }

    async fn handle_not_found(
        &self,
        tx: &WalletTransaction,
        summary: &mut WithdrawalPassSummary,
    ) {
        let elapsed = Utc::now() - tx.created_at;
        if elapsed <= self.grace {
            // Likely not yet indexed; keep waiting.
            debug!(tx = %tx.id, elapsed_secs = elapsed.num_seconds(), "hash not found, within grace window");
            summary.still_pending += 1;
            return;
        }

        let transitioned = match self
            .store
            .update_transaction_status(tx.id, TxStatus::Failed, tx.confirmations, None)
            .await
        {
            Ok(transitioned) => transitioned,
            Err(e) => {
                error!(tx = %tx.id, error = %e, "failure update failed");
                summary.ledger_failures += 1;
                return;
            }
        };
        if !transitioned {
            debug!(tx = %tx.id, "withdrawal already resolved");
            return;
        }

        // Restore funds: balance gets amount+fee back, the lock is released.
        let restore = tx.amount + tx.fee;
        let balance = self.store.increment_balance(tx.wallet_id, restore).await;
        let lock = self.store.adjust_locked_balance(tx.wallet_id, -restore).await;
        match (balance, lock) {
            (Ok(()), Ok(())) => {
                warn!(
                    tx = %tx.id,
                    wallet = tx.wallet_id,
                    symbol = %tx.chain_symbol,
                    restored = %restore,
                    "withdrawal unresolved past grace window, funds restored"
                );
                summary.failed += 1;
            }
            (balance, lock) => {
                if let Err(e) = balance {
                    error!(tx = %tx.id, error = %e, "balance restore failed");
                }
                if let Err(e) = lock {
                    error!(tx = %tx.id, error = %e, "lock release failed");
                }
                summary.ledger_failures += 1;
            }
        }
    }
}
