//! Chain Adapter Layer
//!
//! Normalizes "fetch incoming transactions for an address" and "fetch
//! confirmation depth for a transaction hash" behind one capability
//! interface, implemented once per chain family:
//! - UTXO chains (esplora-style indexers)
//! - EVM chains (etherscan-style account indexers + proxy RPC)
//! - Tron (TronGrid-style REST)
//! - Solana (JSON-RPC)
//!
//! Every adapter is configured with an ordered list of backend endpoints
//! and transparently retries the same logical call against the next
//! endpoint on failure. Only when the whole list is exhausted does a call
//! fail, and then only with [`ChainError::Unavailable`] — callers treat
//! that as "retry next poll cycle", never as fatal.

pub mod endpoints;
pub mod evm;
pub mod mock;
pub mod solana;
pub mod tron;
pub mod utxo;

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::ChainEntry;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("all {tried} endpoints for {chain} failed")]
    Unavailable { chain: String, tried: usize },

    #[error("no adapter configured for symbol {0}")]
    UnsupportedAsset(String),

    #[error("malformed payload: {0}")]
    Parse(String),

    #[error("http client: {0}")]
    Client(String),
}

/// An incoming transfer observed for a watched deposit address.
///
/// `value_received` is the value paid to the queried address specifically:
/// for UTXO chains the sum of outputs paying the address, for account-model
/// chains the transaction value when `to == address`.
#[derive(Debug, Clone)]
pub struct IncomingTx {
    pub tx_hash: String,
    pub value_received: Decimal,
    /// Whether the transaction is already included in a block. The deposit
    /// scanner only settles block-confirmed transactions.
    pub block_confirmed: bool,
}

/// Confirmation depth of a transaction as reported by the chain.
#[derive(Debug, Clone, Copy)]
pub struct TxConfirmations {
    pub confirmations: u32,
    /// False when no endpoint knows the hash (not yet indexed, or invalid).
    pub found: bool,
}

/// Unified interface for querying different blockchains.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Symbol this adapter instance serves (e.g. "BTC", "USDT-TRC20").
    fn chain_symbol(&self) -> &str;

    /// Fetch incoming transactions for a deposit address. Each call
    /// re-queries current chain state; results are finite.
    async fn list_incoming(&self, address: &str) -> Result<Vec<IncomingTx>, ChainError>;

    /// Fetch the current confirmation depth for a transaction hash.
    async fn get_confirmations(&self, tx_hash: &str) -> Result<TxConfirmations, ChainError>;
}

/// Query model shared by a group of chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    Utxo,
    Evm,
    Tron,
    Solana,
}

/// The host chain a symbol settles on. Token variants map to the chain
/// that carries them, so an ERC-20 token inherits ETH's confirmation
/// threshold and a TRC-20 token inherits TRX's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostChain {
    Btc,
    Eth,
    Bsc,
    Sol,
    Trx,
}

impl HostChain {
    /// Normalize a chain-asset symbol to its host chain. Pure function.
    ///
    /// Plain symbols name the chain itself ("BTC", "ETH", "SOL"); suffixed
    /// symbols name a token standard on a host chain ("USDT-ERC20",
    /// "USDT-BEP20", "USDC-TRC20", "USDC-SPL").
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        let upper = symbol.to_ascii_uppercase();
        if let Some((_, network)) = upper.split_once('-') {
            return match network {
                "ERC20" => Some(Self::Eth),
                "BEP20" => Some(Self::Bsc),
                "TRC20" => Some(Self::Trx),
                "SPL" => Some(Self::Sol),
                _ => None,
            };
        }
        match upper.as_str() {
            "BTC" => Some(Self::Btc),
            "ETH" => Some(Self::Eth),
            "BNB" | "BSC" => Some(Self::Bsc),
            "SOL" => Some(Self::Sol),
            "TRX" => Some(Self::Trx),
            _ => None,
        }
    }

    /// Confirmation depth at which a transaction on this chain is
    /// considered settled.
    pub fn required_confirmations(self) -> u32 {
        match self {
            Self::Btc => 2,
            Self::Eth => 12,
            Self::Bsc => 15,
            Self::Sol => 32,
            Self::Trx => 19,
        }
    }

    pub fn family(self) -> ChainFamily {
        match self {
            Self::Btc => ChainFamily::Utxo,
            Self::Eth | Self::Bsc => ChainFamily::Evm,
            Self::Sol => ChainFamily::Solana,
            Self::Trx => ChainFamily::Tron,
        }
    }
}

/// Default confirmation threshold for a symbol, from the built-in policy
/// table. Config entries may override per symbol.
pub fn default_required_confirmations(symbol: &str) -> Option<u32> {
    HostChain::from_symbol(symbol).map(HostChain::required_confirmations)
}

/// Registry of adapter instances keyed by chain-asset symbol, with the
/// resolved confirmation threshold per symbol.
///
/// Adding a chain means adding one adapter instance here (usually via one
/// config entry), not editing a dispatch chain.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn ChainAdapter>>,
    thresholds: HashMap<String, u32>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from configured chain entries.
    pub fn from_config(entries: &[ChainEntry]) -> Result<Self, ChainError> {
        let mut registry = Self::new();
        for entry in entries {
            let adapter: Arc<dyn ChainAdapter> = match entry.family {
                ChainFamily::Utxo => Arc::new(utxo::UtxoAdapter::new(
                    entry.symbol.clone(),
                    entry.endpoints.clone(),
                )?),
                ChainFamily::Evm => Arc::new(evm::EvmAdapter::new(
                    entry.symbol.clone(),
                    entry.endpoints.clone(),
                    entry.token.clone(),
                )?),
                ChainFamily::Tron => Arc::new(tron::TronAdapter::new(
                    entry.symbol.clone(),
                    entry.endpoints.clone(),
                    entry.token.clone(),
                )?),
                ChainFamily::Solana => Arc::new(solana::SolanaAdapter::new(
                    entry.symbol.clone(),
                    entry.endpoints.clone(),
                )?),
            };
            registry.register(&entry.symbol, adapter, entry.required_confirmations)?;
        }
        Ok(registry)
    }

    /// Register an adapter for a symbol. The threshold comes from the
    /// override when given, otherwise from the policy table; symbols the
    /// policy table cannot normalize must carry an explicit override.
    pub fn register(
        &mut self,
        symbol: &str,
        adapter: Arc<dyn ChainAdapter>,
        threshold_override: Option<u32>,
    ) -> Result<(), ChainError> {
        let threshold = threshold_override
            .or_else(|| default_required_confirmations(symbol))
            .ok_or_else(|| ChainError::UnsupportedAsset(symbol.to_string()))?;
        self.adapters.insert(symbol.to_string(), adapter);
        self.thresholds.insert(symbol.to_string(), threshold);
        Ok(())
    }

    pub fn adapter_for(&self, symbol: &str) -> Result<&Arc<dyn ChainAdapter>, ChainError> {
        self.adapters
            .get(symbol)
            .ok_or_else(|| ChainError::UnsupportedAsset(symbol.to_string()))
    }

    pub fn required_confirmations(&self, symbol: &str) -> Result<u32, ChainError> {
        self.thresholds
            .get(symbol)
            .copied()
            .ok_or_else(|| ChainError::UnsupportedAsset(symbol.to_string()))
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
