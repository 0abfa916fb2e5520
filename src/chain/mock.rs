//! Scripted chain adapter for tests and local dry runs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{ChainAdapter, ChainError, IncomingTx, TxConfirmations};

/// In-memory [`ChainAdapter`] with scripted responses and an
/// unavailability switch to simulate every endpoint failing.
pub struct MockAdapter {
    symbol: String,
    incoming: Mutex<HashMap<String, Vec<IncomingTx>>>,
    confirmations: Mutex<HashMap<String, TxConfirmations>>,
    unavailable: AtomicBool,
}

impl MockAdapter {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            incoming: Mutex::new(HashMap::new()),
            confirmations: Mutex::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Script an incoming transaction for an address.
    pub fn push_incoming(&self, address: &str, tx: IncomingTx) {
        self.incoming
            .lock()
            .unwrap()
            .entry(address.to_string())
            .or_default()
            .push(tx);
    }

    /// Script the confirmation answer for a transaction hash.
    pub fn set_confirmations(&self, tx_hash: &str, confirmations: u32, found: bool) {
        self.confirmations.lock().unwrap().insert(
            tx_hash.to_string(),
            TxConfirmations {
                confirmations,
                found,
            },
        );
    }

    /// Simulate all endpoints failing for this chain.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), ChainError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ChainError::Unavailable {
                chain: self.symbol.clone(),
                tried: 1,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ChainAdapter for MockAdapter {
    fn chain_symbol(&self) -> &str {
        &self.symbol
    }

    async fn list_incoming(&self, address: &str) -> Result<Vec<IncomingTx>, ChainError> {
        self.check_available()?;
        Ok(self
            .incoming
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_confirmations(&self, tx_hash: &str) -> Result<TxConfirmations, ChainError> {
        self.check_available()?;
        Ok(self
            .confirmations
            .lock()
            .unwrap()
            .get(tx_hash)
            .copied()
            .unwrap_or(TxConfirmations {
                confirmations: 0,
                found: false,
            }))
    }
}
