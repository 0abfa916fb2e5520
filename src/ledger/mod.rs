//! Ledger Store
//!
//! Wallet balance records, the transaction log, and the dedup index of
//! already-settled chain events. The settlement passes are the only
//! writers; everything they need across invocations lives here, which is
//! what makes the passes themselves stateless and idempotent.
//!
//! The store contract is deliberately narrow: insert-if-absent for the
//! dedup key, atomic increment/decrement for balance fields (never
//! read-modify-write in application code), and terminal-guarded status
//! transitions so a concurrent pass that loses the race updates nothing.

pub mod memory;
pub mod pg;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("wallet {0} not found")]
    WalletNotFound(i64),

    #[error("invalid row: {0}")]
    InvalidRow(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxType {
    Deposit,
    Withdrawal,
}

impl TxType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "deposit" => Some(Self::Deposit),
            "withdrawal" => Some(Self::Withdrawal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Completed,
    Failed,
}

impl TxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One row per (user, chain-asset). `balance` is spendable; `locked_balance`
/// is earmarked for in-flight withdrawals. Both stay non-negative.
#[derive(Debug, Clone, Serialize)]
pub struct Wallet {
    pub id: i64,
    pub user_id: i64,
    pub chain_symbol: String,
    pub deposit_address: Option<String>,
    pub balance: Decimal,
    pub locked_balance: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// One row per settlement event.
///
/// Deposits are created `completed` at first sighting; withdrawals are
/// created `pending` by the external initiation path and advanced here to
/// `completed` or `failed`. Terminal states are never left.
#[derive(Debug, Clone, Serialize)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub wallet_id: i64,
    pub tx_type: TxType,
    pub chain_symbol: String,
    pub amount: Decimal,
    pub fee: Decimal,
    pub tx_hash: Option<String>,
    pub status: TxStatus,
    pub confirmations: u32,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WalletTransaction {
    /// A deposit settled at first sighting.
    pub fn deposit(
        wallet_id: i64,
        chain_symbol: &str,
        amount: Decimal,
        tx_hash: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            wallet_id,
            tx_type: TxType::Deposit,
            chain_symbol: chain_symbol.to_string(),
            amount,
            fee: Decimal::ZERO,
            tx_hash: Some(tx_hash.to_string()),
            status: TxStatus::Completed,
            confirmations: 0,
            created_at: now,
            completed_at: Some(now),
        }
    }

    /// A pending withdrawal as the initiation path records it. Used by
    /// tests and tooling; the initiation path itself is external.
    pub fn pending_withdrawal(
        wallet_id: i64,
        chain_symbol: &str,
        amount: Decimal,
        fee: Decimal,
        tx_hash: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            wallet_id,
            tx_type: TxType::Withdrawal,
            chain_symbol: chain_symbol.to_string(),
            amount,
            fee,
            tx_hash: Some(tx_hash.to_string()),
            status: TxStatus::Pending,
            confirmations: 0,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Persistence contract consumed by the settlement passes.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// All wallets eligible for deposit scanning.
    async fn wallets_with_deposit_address(&self) -> Result<Vec<Wallet>, LedgerError>;

    /// All pending withdrawals that carry a transaction hash.
    async fn pending_withdrawals(&self) -> Result<Vec<WalletTransaction>, LedgerError>;

    /// Insert the dedup key; false when it was already present.
    async fn insert_dedup_key_if_absent(
        &self,
        tx_hash: &str,
        chain_symbol: &str,
    ) -> Result<bool, LedgerError>;

    /// Insert a transaction row.
    async fn insert_transaction(&self, tx: &WalletTransaction) -> Result<(), LedgerError>;

    /// Insert the dedup key and the transaction row as one unit; false
    /// when the dedup key already existed (a concurrent pass won) and
    /// nothing was written. The balance credit is deliberately outside
    /// this unit: if it fails, the transaction log still carries the
    /// event and reconciliation re-derives the balance from it.
    async fn record_settlement(&self, tx: &WalletTransaction) -> Result<bool, LedgerError>;

    /// Atomically add `delta` (may be negative) to a wallet's balance.
    async fn increment_balance(&self, wallet_id: i64, delta: Decimal) -> Result<(), LedgerError>;

    /// Atomically add `delta` to a wallet's locked balance, floored at
    /// zero in the store itself.
    async fn adjust_locked_balance(
        &self,
        wallet_id: i64,
        delta: Decimal,
    ) -> Result<(), LedgerError>;

    /// Persist status/confirmations for a transaction. Only rows still
    /// `pending` are touched, so terminal transitions are one-way and a
    /// duplicate concurrent pass is a no-op; returns whether a row was
    /// updated.
    async fn update_transaction_status(
        &self,
        id: Uuid,
        status: TxStatus,
        confirmations: u32,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<bool, LedgerError>;

    /// Every wallet, for reconciliation.
    async fn all_wallets(&self) -> Result<Vec<Wallet>, LedgerError>;

    /// Full transaction log for one wallet, for reconciliation.
    async fn transactions_for_wallet(
        &self,
        wallet_id: i64,
    ) -> Result<Vec<WalletTransaction>, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trip() {
        for status in [TxStatus::Pending, TxStatus::Completed, TxStatus::Failed] {
            assert_eq!(TxStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TxStatus::parse("PENDING"), None);
        assert!(TxStatus::Completed.is_terminal());
        assert!(TxStatus::Failed.is_terminal());
        assert!(!TxStatus::Pending.is_terminal());
    }

    #[test]
    fn type_round_trip() {
        for tx_type in [TxType::Deposit, TxType::Withdrawal] {
            assert_eq!(TxType::parse(tx_type.as_str()), Some(tx_type));
        }
    }

    #[test]
    fn deposit_constructor_settles_immediately() {
        let tx = WalletTransaction::deposit(7, "BTC", Decimal::new(100_000, 8), "abc");
        assert_eq!(tx.tx_type, TxType::Deposit);
        assert_eq!(tx.status, TxStatus::Completed);
        assert!(tx.completed_at.is_some());
        assert_eq!(tx.fee, Decimal::ZERO);
        assert_eq!(tx.tx_hash.as_deref(), Some("abc"));
    }
}
