//! chainsettle - Multi-chain deposit/withdrawal settlement engine
//!
//! Watches deposit addresses across chain families, credits user wallets
//! exactly once per observed on-chain transfer, and advances broadcast
//! withdrawals to completed or failed as their confirmation depth grows.
//!
//! # Modules
//!
//! - [`chain`] - Chain adapters (UTXO, EVM, Tron, Solana) behind one trait,
//!   with ordered endpoint failover
//! - [`ledger`] - Wallet/transaction store with the dedup index that makes
//!   settlement at-most-once
//! - [`settlement`] - The periodic deposit-scan and withdrawal-tracking
//!   passes, plus balance reconciliation
//! - [`config`] - YAML application configuration
//! - [`logging`] - tracing subscriber setup

pub mod chain;
pub mod config;
pub mod ledger;
pub mod logging;
pub mod settlement;

// Convenient re-exports at crate root
pub use chain::{AdapterRegistry, ChainAdapter, ChainError, IncomingTx, TxConfirmations};
pub use config::AppConfig;
pub use ledger::{LedgerError, LedgerStore, TxStatus, TxType, Wallet, WalletTransaction};
pub use settlement::{DepositScanner, Reconciler, WithdrawalTracker};
