//! EVM chain adapter (etherscan-style account indexers).
//!
//! Incoming transfers come from the `account` module (`txlist` for native
//! value, `tokentx` for ERC-20/BEP-20 variants); confirmation depth comes
//! from the `proxy` module (`eth_getTransactionByHash` + `eth_blockNumber`)
//! so one endpoint kind serves the whole adapter.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use tracing::debug;

use super::endpoints::{EndpointError, get_json, http_client, with_failover};
use super::{ChainAdapter, ChainError, IncomingTx, TxConfirmations};

const NATIVE_DECIMALS: u32 = 18;

pub struct EvmAdapter {
    symbol: String,
    endpoints: Vec<String>,
    /// Token symbol filter for ERC-20/BEP-20 variants; `None` scans native
    /// value transfers.
    token: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ScanResponse<T> {
    #[allow(dead_code)]
    status: String,
    result: T,
}

#[derive(Debug, Deserialize)]
struct NativeTx {
    hash: String,
    #[serde(default)]
    to: String,
    value: String,
    confirmations: String,
    #[serde(rename = "isError", default)]
    is_error: String,
}

#[derive(Debug, Deserialize)]
struct TokenTx {
    hash: String,
    #[serde(default)]
    to: String,
    value: String,
    confirmations: String,
    #[serde(rename = "tokenSymbol", default)]
    token_symbol: String,
    #[serde(rename = "tokenDecimal", default)]
    token_decimal: String,
}

#[derive(Debug, Deserialize)]
struct ProxyResponse<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProxyTx {
    block_number: Option<String>,
}

impl EvmAdapter {
    pub fn new(
        symbol: String,
        endpoints: Vec<String>,
        token: Option<String>,
    ) -> Result<Self, ChainError> {
        Ok(Self {
            symbol,
            endpoints,
            token,
            client: http_client()?,
        })
    }

    async fn native_txs(
        &self,
        base: String,
        address: &str,
    ) -> Result<Vec<NativeTx>, EndpointError> {
        let url = format!("{base}?module=account&action=txlist&address={address}&sort=desc");
        let response: ScanResponse<Vec<NativeTx>> = get_json(&self.client, &url).await?;
        Ok(response.result)
    }

    async fn token_txs(&self, base: String, address: &str) -> Result<Vec<TokenTx>, EndpointError> {
        let url = format!("{base}?module=account&action=tokentx&address={address}&sort=desc");
        let response: ScanResponse<Vec<TokenTx>> = get_json(&self.client, &url).await?;
        Ok(response.result)
    }

    async fn confirmations_at(
        &self,
        base: String,
        tx_hash: &str,
    ) -> Result<TxConfirmations, EndpointError> {
        let tx_url =
            format!("{base}?module=proxy&action=eth_getTransactionByHash&txhash={tx_hash}");
        let tx: ProxyResponse<Option<ProxyTx>> = get_json(&self.client, &tx_url).await?;

        let Some(tx) = tx.result else {
            return Ok(TxConfirmations {
                confirmations: 0,
                found: false,
            });
        };
        // Known but not yet mined.
        let Some(block_hex) = tx.block_number else {
            return Ok(TxConfirmations {
                confirmations: 0,
                found: true,
            });
        };

        let head_url = format!("{base}?module=proxy&action=eth_blockNumber");
        let head: ProxyResponse<String> = get_json(&self.client, &head_url).await?;

        let mined = parse_hex_u64(&block_hex)?;
        let latest = parse_hex_u64(&head.result)?;
        Ok(TxConfirmations {
            confirmations: latest.saturating_sub(mined).saturating_add(1) as u32,
            found: true,
        })
    }
}

#[async_trait]
impl ChainAdapter for EvmAdapter {
    fn chain_symbol(&self) -> &str {
        &self.symbol
    }

    async fn list_incoming(&self, address: &str) -> Result<Vec<IncomingTx>, ChainError> {
        let incoming: Vec<IncomingTx> = match &self.token {
            None => {
                let txs = with_failover(&self.symbol, &self.endpoints, |base| {
                    self.native_txs(base, address)
                })
                .await?;
                txs.into_iter()
                    .filter(|tx| tx.is_error != "1" && tx.to.eq_ignore_ascii_case(address))
                    .map(|tx| IncomingTx {
                        value_received: scale_units(&tx.value, NATIVE_DECIMALS),
                        block_confirmed: parse_confirmations(&tx.confirmations) >= 1,
                        tx_hash: tx.hash,
                    })
                    .collect()
            }
            Some(token) => {
                let txs = with_failover(&self.symbol, &self.endpoints, |base| {
                    self.token_txs(base, address)
                })
                .await?;
                txs.into_iter()
                    .filter(|tx| {
                        tx.to.eq_ignore_ascii_case(address)
                            && tx.token_symbol.eq_ignore_ascii_case(token)
                    })
                    .map(|tx| {
                        let decimals =
                            tx.token_decimal.parse::<u32>().unwrap_or(NATIVE_DECIMALS);
                        IncomingTx {
                            value_received: scale_units(&tx.value, decimals),
                            block_confirmed: parse_confirmations(&tx.confirmations) >= 1,
                            tx_hash: tx.hash,
                        }
                    })
                    .collect()
            }
        };
        debug!(chain = %self.symbol, address, count = incoming.len(), "incoming transfers fetched");
        Ok(incoming)
    }

    async fn get_confirmations(&self, tx_hash: &str) -> Result<TxConfirmations, ChainError> {
        with_failover(&self.symbol, &self.endpoints, |base| {
            self.confirmations_at(base, tx_hash)
        })
        .await
    }
}

/// Scale a raw integer amount string by the asset's decimals. Unparseable
/// or out-of-range values become zero and get skipped by the scanner as
/// no-ops.
fn scale_units(raw: &str, decimals: u32) -> Decimal {
    let Ok(units) = i128::from_str(raw) else {
        return Decimal::ZERO;
    };
    Decimal::try_from_i128_with_scale(units, decimals.min(28)).unwrap_or_default()
}

fn parse_confirmations(raw: &str) -> u32 {
    raw.parse().unwrap_or(0)
}

fn parse_hex_u64(raw: &str) -> Result<u64, EndpointError> {
    u64::from_str_radix(raw.trim_start_matches("0x"), 16)
        .map_err(|e| EndpointError::Payload(format!("hex number {raw:?}: {e}")))
}
