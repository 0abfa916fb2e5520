//! Postgres ledger backend.
//!
//! Schema lives in `migrations/0001_settlement.sql`. All queries are
//! runtime-checked so the crate builds without a live database.
//!
//! The concurrency-sensitive operations are pushed into SQL:
//! - dedup key: `ON CONFLICT DO NOTHING` on the `(tx_hash, chain_symbol)`
//!   primary key, with `rows_affected` deciding who won;
//! - balance mutations: atomic `SET balance = balance + $n` increments,
//!   `GREATEST(.., 0)` flooring the locked balance;
//! - status transitions: `WHERE status = 'pending'` so a pass that lost
//!   the race to a terminal transition updates zero rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use super::{LedgerError, LedgerStore, TxStatus, TxType, Wallet, WalletTransaction};

pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str) -> Result<Self, LedgerError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn wallet_from_row(row: &PgRow) -> Result<Wallet, LedgerError> {
    Ok(Wallet {
        id: row.get("id"),
        user_id: row.get("user_id"),
        chain_symbol: row.get("chain_symbol"),
        deposit_address: row.get("deposit_address"),
        balance: row.get("balance"),
        locked_balance: row.get("locked_balance"),
        updated_at: row.get("updated_at"),
    })
}

fn tx_from_row(row: &PgRow) -> Result<WalletTransaction, LedgerError> {
    let raw_type: String = row.get("tx_type");
    let raw_status: String = row.get("status");
    Ok(WalletTransaction {
        id: row.get("id"),
        wallet_id: row.get("wallet_id"),
        tx_type: TxType::parse(&raw_type)
            .ok_or_else(|| LedgerError::InvalidRow(format!("tx_type {raw_type:?}")))?,
        chain_symbol: row.get("chain_symbol"),
        amount: row.get("amount"),
        fee: row.get("fee"),
        tx_hash: row.get("tx_hash"),
        status: TxStatus::parse(&raw_status)
            .ok_or_else(|| LedgerError::InvalidRow(format!("status {raw_status:?}")))?,
        confirmations: row.get::<i32, _>("confirmations").max(0) as u32,
        created_at: row.get("created_at"),
        completed_at: row.get("completed_at"),
    })
}

const TX_COLUMNS: &str = "id, wallet_id, tx_type, chain_symbol, amount, fee, tx_hash, status, \
                          confirmations, created_at, completed_at";

#[async_trait]
impl LedgerStore for PgLedger {
    async fn wallets_with_deposit_address(&self) -> Result<Vec<Wallet>, LedgerError> {
        let rows = sqlx::query(
            r#"SELECT id, user_id, chain_symbol, deposit_address, balance, locked_balance, updated_at
               FROM wallets
               WHERE deposit_address IS NOT NULL
               ORDER BY id"#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(wallet_from_row).collect()
    }

    async fn pending_withdrawals(&self) -> Result<Vec<WalletTransaction>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {TX_COLUMNS} FROM wallet_transactions \
             WHERE tx_type = 'withdrawal' AND status = 'pending' AND tx_hash IS NOT NULL \
             ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(tx_from_row).collect()
    }

    async fn insert_dedup_key_if_absent(
        &self,
        tx_hash: &str,
        chain_symbol: &str,
    ) -> Result<bool, LedgerError> {
        let result = sqlx::query(
            r#"INSERT INTO settled_chain_events (tx_hash, chain_symbol)
               VALUES ($1, $2)
               ON CONFLICT (tx_hash, chain_symbol) DO NOTHING"#,
        )
        .bind(tx_hash)
        .bind(chain_symbol)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_transaction(&self, tx: &WalletTransaction) -> Result<(), LedgerError> {
        sqlx::query(
            r#"INSERT INTO wallet_transactions
               (id, wallet_id, tx_type, chain_symbol, amount, fee, tx_hash, status,
                confirmations, created_at, completed_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"#,
        )
        .bind(tx.id)
        .bind(tx.wallet_id)
        .bind(tx.tx_type.as_str())
        .bind(&tx.chain_symbol)
        .bind(tx.amount)
        .bind(tx.fee)
        .bind(&tx.tx_hash)
        .bind(tx.status.as_str())
        .bind(tx.confirmations as i32)
        .bind(tx.created_at)
        .bind(tx.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_settlement(&self, tx: &WalletTransaction) -> Result<bool, LedgerError> {
        let hash = tx
            .tx_hash
            .as_deref()
            .ok_or_else(|| LedgerError::InvalidRow("settlement without tx_hash".to_string()))?;

        let mut db_tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"INSERT INTO settled_chain_events (tx_hash, chain_symbol)
               VALUES ($1, $2)
               ON CONFLICT (tx_hash, chain_symbol) DO NOTHING"#,
        )
        .bind(hash)
        .bind(&tx.chain_symbol)
        .execute(&mut *db_tx)
        .await?;

        if inserted.rows_affected() == 0 {
            // Concurrent pass won; nothing to write.
            return Ok(false);
        }

        sqlx::query(
            r#"INSERT INTO wallet_transactions
               (id, wallet_id, tx_type, chain_symbol, amount, fee, tx_hash, status,
                confirmations, created_at, completed_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"#,
        )
        .bind(tx.id)
        .bind(tx.wallet_id)
        .bind(tx.tx_type.as_str())
        .bind(&tx.chain_symbol)
        .bind(tx.amount)
        .bind(tx.fee)
        .bind(&tx.tx_hash)
        .bind(tx.status.as_str())
        .bind(tx.confirmations as i32)
        .bind(tx.created_at)
        .bind(tx.completed_at)
        .execute(&mut *db_tx)
        .await?;

        db_tx.commit().await?;
        Ok(true)
    }

    async fn increment_balance(&self, wallet_id: i64, delta: Decimal) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"UPDATE wallets
               SET balance = balance + $2, updated_at = NOW()
               WHERE id = $1"#,
        )
        .bind(wallet_id)
        .bind(delta)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::WalletNotFound(wallet_id));
        }
        Ok(())
    }

    async fn adjust_locked_balance(
        &self,
        wallet_id: i64,
        delta: Decimal,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"UPDATE wallets
               SET locked_balance = GREATEST(locked_balance + $2, 0), updated_at = NOW()
               WHERE id = $1"#,
        )
        .bind(wallet_id)
        .bind(delta)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::WalletNotFound(wallet_id));
        }
        Ok(())
    }

    async fn update_transaction_status(
        &self,
        id: Uuid,
        status: TxStatus,
        confirmations: u32,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<bool, LedgerError> {
        let result = sqlx::query(
            r#"UPDATE wallet_transactions
               SET status = $2, confirmations = $3,
                   completed_at = COALESCE($4, completed_at)
               WHERE id = $1 AND status = 'pending'"#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(confirmations as i32)
        .bind(completed_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn all_wallets(&self) -> Result<Vec<Wallet>, LedgerError> {
        let rows = sqlx::query(
            r#"SELECT id, user_id, chain_symbol, deposit_address, balance, locked_balance, updated_at
               FROM wallets ORDER BY id"#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(wallet_from_row).collect()
    }

    async fn transactions_for_wallet(
        &self,
        wallet_id: i64,
    ) -> Result<Vec<WalletTransaction>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {TX_COLUMNS} FROM wallet_transactions \
             WHERE wallet_id = $1 ORDER BY created_at"
        ))
        .bind(wallet_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(tx_from_row).collect()
    }
}
