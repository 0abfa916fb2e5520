//! UTXO chain adapter (esplora-style indexers).
//!
//! Speaks the REST dialect served by blockstream.info / mempool.space
//! style indexers. Value received is the sum of outputs paying the
//! queried address only; change outputs back to a sender are invisible
//! here, and a self-spend observed incidentally sums to zero and is
//! skipped by the scanner.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use super::endpoints::{EndpointError, get_json, get_text, http_client, join_url, with_failover};
use super::{ChainAdapter, ChainError, IncomingTx, TxConfirmations};

const SATS_SCALE: u32 = 8;

pub struct UtxoAdapter {
    symbol: String,
    endpoints: Vec<String>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct EsploraTx {
    txid: String,
    status: EsploraTxStatus,
    vout: Vec<EsploraVout>,
}

#[derive(Debug, Deserialize)]
struct EsploraTxStatus {
    confirmed: bool,
    block_height: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct EsploraVout {
    scriptpubkey_address: Option<String>,
    value: u64,
}

impl UtxoAdapter {
    pub fn new(symbol: String, endpoints: Vec<String>) -> Result<Self, ChainError> {
        Ok(Self {
            symbol,
            endpoints,
            client: http_client()?,
        })
    }

    async fn address_txs(
        &self,
        base: String,
        address: &str,
    ) -> Result<Vec<EsploraTx>, EndpointError> {
        let url = join_url(&base, &format!("address/{address}/txs"));
        get_json(&self.client, &url).await
    }

    /// Tip height plus transaction status from the same endpoint, so the
    /// depth calculation is internally consistent.
    async fn confirmations_at(
        &self,
        base: String,
        tx_hash: &str,
    ) -> Result<TxConfirmations, EndpointError> {
        let url = join_url(&base, &format!("tx/{tx_hash}/status"));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EndpointError::Transport(e.to_string()))?;

        // 404 is a definitive answer, not an endpoint failure.
        if response.status().as_u16() == 404 {
            return Ok(TxConfirmations {
                confirmations: 0,
                found: false,
            });
        }
        if !response.status().is_success() {
            return Err(EndpointError::Status(response.status().as_u16()));
        }
        let status: EsploraTxStatus = response
            .json()
            .await
            .map_err(|e| EndpointError::Payload(e.to_string()))?;

        let Some(height) = status.block_height.filter(|_| status.confirmed) else {
            return Ok(TxConfirmations {
                confirmations: 0,
                found: true,
            });
        };

        let tip_url = join_url(&base, "blocks/tip/height");
        let tip: u64 = get_text(&self.client, &tip_url)
            .await?
            .trim()
            .parse()
            .map_err(|e| EndpointError::Payload(format!("tip height: {e}")))?;

        Ok(TxConfirmations {
            confirmations: tip.saturating_sub(height).saturating_add(1) as u32,
            found: true,
        })
    }

    fn value_to_address(tx: &EsploraTx, address: &str) -> Decimal {
        let sats: u64 = tx
            .vout
            .iter()
            .filter(|v| v.scriptpubkey_address.as_deref() == Some(address))
            .map(|v| v.value)
            .sum();
        Decimal::new(sats as i64, SATS_SCALE)
    }
}

#[async_trait]
impl ChainAdapter for UtxoAdapter {
    fn chain_symbol(&self) -> &str {
        &self.symbol
    }

    async fn list_incoming(&self, address: &str) -> Result<Vec<IncomingTx>, ChainError> {
        let txs = with_failover(&self.symbol, &self.endpoints, |base| {
            self.address_txs(base, address)
        })
        .await?;

        debug!(chain = %self.symbol, address, count = txs.len(), "address transactions fetched");

        Ok(txs
            .into_iter()
            .map(|tx| IncomingTx {
                value_received: Self::value_to_address(&tx, address),
                block_confirmed: tx.status.confirmed,
                tx_hash: tx.txid,
            })
            .collect())
    }

    async fn get_confirmations(&self, tx_hash: &str) -> Result<TxConfirmations, ChainError> {
        with_failover(&self.symbol, &self.endpoints, |base| {
            self.confirmations_at(base, tx_hash)
        })
        .await
    }
}
