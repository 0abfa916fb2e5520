//! In-memory ledger backend.
//!
//! Mirrors the Postgres backend's semantics (insert-if-absent dedup,
//! floored locked-balance adjustment, pending-only status transitions)
//! behind a mutex. Drives unit and integration tests and local dry runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use uuid::Uuid;

use super::{LedgerError, LedgerStore, TxStatus, TxType, Wallet, WalletTransaction};

#[derive(Default)]
struct Inner {
    wallets: BTreeMap<i64, Wallet>,
    transactions: BTreeMap<Uuid, WalletTransaction>,
    dedup: HashSet<(String, String)>,
    next_wallet_id: i64,
}

#[derive(Default)]
pub struct MemoryLedger {
    inner: Mutex<Inner>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a wallet and return its id.
    pub fn add_wallet(
        &self,
        user_id: i64,
        chain_symbol: &str,
        deposit_address: Option<&str>,
    ) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        inner.next_wallet_id += 1;
        let id = inner.next_wallet_id;
        inner.wallets.insert(
            id,
            Wallet {
                id,
                user_id,
                chain_symbol: chain_symbol.to_string(),
                deposit_address: deposit_address.map(str::to_string),
                balance: Decimal::ZERO,
                locked_balance: Decimal::ZERO,
                updated_at: Utc::now(),
            },
        );
        id
    }

    pub fn set_balances(&self, wallet_id: i64, balance: Decimal, locked: Decimal) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(wallet) = inner.wallets.get_mut(&wallet_id) {
            wallet.balance = balance;
            wallet.locked_balance = locked;
        }
    }

    pub fn wallet(&self, wallet_id: i64) -> Option<Wallet> {
        self.inner.lock().unwrap().wallets.get(&wallet_id).cloned()
    }

    pub fn transaction(&self, id: Uuid) -> Option<WalletTransaction> {
        self.inner.lock().unwrap().transactions.get(&id).cloned()
    }

    /// Deposit transactions recorded for a wallet, for assertions.
    pub fn deposits_for(&self, wallet_id: i64) -> Vec<WalletTransaction> {
        self.inner
            .lock()
            .unwrap()
            .transactions
            .values()
            .filter(|tx| tx.wallet_id == wallet_id && tx.tx_type == TxType::Deposit)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn wallets_with_deposit_address(&self) -> Result<Vec<Wallet>, LedgerError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .wallets
            .values()
            .filter(|w| w.deposit_address.is_some())
            .cloned()
            .collect())
    }

    async fn pending_withdrawals(&self) -> Result<Vec<WalletTransaction>, LedgerError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .transactions
            .values()
            .filter(|tx| {
                tx.tx_type == TxType::Withdrawal
                    && tx.status == TxStatus::Pending
                    && tx.tx_hash.is_some()
            })
            .cloned()
            .collect())
    }

    async fn insert_dedup_key_if_absent(
        &self,
        tx_hash: &str,
        chain_symbol: &str,
    ) -> Result<bool, LedgerError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .dedup
            .insert((tx_hash.to_string(), chain_symbol.to_string())))
    }

    async fn insert_transaction(&self, tx: &WalletTransaction) -> Result<(), LedgerError> {
        self.inner
            .lock()
            .unwrap()
            .transactions
            .insert(tx.id, tx.clone());
        Ok(())
    }

    async fn record_settlement(&self, tx: &WalletTransaction) -> Result<bool, LedgerError> {
        let hash = tx
            .tx_hash
            .clone()
            .ok_or_else(|| LedgerError::InvalidRow("settlement without tx_hash".to_string()))?;
        let mut inner = self.inner.lock().unwrap();
        if !inner.dedup.insert((hash, tx.chain_symbol.clone())) {
            return Ok(false);
        }
        inner.transactions.insert(tx.id, tx.clone());
        Ok(true)
    }

    async fn increment_balance(&self, wallet_id: i64, delta: Decimal) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        let wallet = inner
            .wallets
            .get_mut(&wallet_id)
            .ok_or(LedgerError::WalletNotFound(wallet_id))?;
        wallet.balance += delta;
        wallet.updated_at = Utc::now();
        Ok(())
    }

    async fn adjust_locked_balance(
        &self,
        wallet_id: i64,
        delta: Decimal,
    ) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        let wallet = inner
            .wallets
            .get_mut(&wallet_id)
            .ok_or(LedgerError::WalletNotFound(wallet_id))?;
        wallet.locked_balance = (wallet.locked_balance + delta).max(Decimal::ZERO);
        wallet.updated_at = Utc::now();
        Ok(())
    }

    async fn update_transaction_status(
        &self,
        id: Uuid,
        status: TxStatus,
        confirmations: u32,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<bool, LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(tx) = inner.transactions.get_mut(&id) else {
            return Ok(false);
        };
        if tx.status != TxStatus::Pending {
            return Ok(false);
        }
        tx.status = status;
        tx.confirmations = confirmations;
        if completed_at.is_some() {
            tx.completed_at = completed_at;
        }
        Ok(true)
    }

    async fn all_wallets(&self) -> Result<Vec<Wallet>, LedgerError> {
        Ok(self.inner.lock().unwrap().wallets.values().cloned().collect())
    }

    async fn transactions_for_wallet(
        &self,
        wallet_id: i64,
    ) -> Result<Vec<WalletTransaction>, LedgerError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .transactions
            .values()
            .filter(|tx| tx.wallet_id == wallet_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dedup_insert_if_absent() {
        let store = MemoryLedger::new();
        assert!(store.insert_dedup_key_if_absent("tx1", "BTC").await.unwrap());
        assert!(!store.insert_dedup_key_if_absent("tx1", "BTC").await.unwrap());
        // Same hash on a different chain is a different event.
        assert!(store.insert_dedup_key_if_absent("tx1", "ETH").await.unwrap());
    }

    #[tokio::test]
    async fn locked_balance_floors_at_zero() {
        let store = MemoryLedger::new();
        let id = store.add_wallet(1, "ETH", None);
        store.set_balances(id, Decimal::ZERO, Decimal::new(5, 1));

        store
            .adjust_locked_balance(id, Decimal::new(-20, 1))
            .await
            .unwrap();
        assert_eq!(store.wallet(id).unwrap().locked_balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn terminal_transition_is_one_way() {
        let store = MemoryLedger::new();
        let id = store.add_wallet(1, "ETH", None);
        let tx = WalletTransaction::pending_withdrawal(
            id,
            "ETH",
            Decimal::new(1, 0),
            Decimal::new(2, 3),
            "0xabc",
        );
        store.insert_transaction(&tx).await.unwrap();

        assert!(
            store
                .update_transaction_status(tx.id, TxStatus::Completed, 14, Some(Utc::now()))
                .await
                .unwrap()
        );
        // Second transition attempt loses.
        assert!(
            !store
                .update_transaction_status(tx.id, TxStatus::Failed, 14, Some(Utc::now()))
                .await
                .unwrap()
        );
        assert_eq!(store.transaction(tx.id).unwrap().status, TxStatus::Completed);
    }

    #[tokio::test]
    async fn record_settlement_is_atomic_per_key() {
        let store = MemoryLedger::new();
        let id = store.add_wallet(1, "BTC", Some("addr"));
        let tx = WalletTransaction::deposit(id, "BTC", Decimal::new(100_000, 8), "tx9");

        assert!(store.record_settlement(&tx).await.unwrap());
        let again = WalletTransaction::deposit(id, "BTC", Decimal::new(100_000, 8), "tx9");
        assert!(!store.record_settlement(&again).await.unwrap());
        assert_eq!(store.deposits_for(id).len(), 1);
    }
}
