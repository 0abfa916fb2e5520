//! Tron chain adapter (TronGrid-style REST).
//!
//! Incoming transfers come from the v1 account endpoints with
//! `only_to=true&only_confirmed=true`, so every returned transaction is
//! already block-included and addressed to the queried wallet. Native TRX
//! and TRC-20 variants use separate endpoints with the same shape of
//! failover.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use tracing::debug;

use super::endpoints::{EndpointError, get_json, http_client, join_url, post_json, with_failover};
use super::{ChainAdapter, ChainError, IncomingTx, TxConfirmations};

const SUN_SCALE: u32 = 6;
const PAGE_LIMIT: u32 = 50;

pub struct TronAdapter {
    symbol: String,
    endpoints: Vec<String>,
    /// TRC-20 token symbol filter; `None` scans native TRX transfers.
    token: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct AccountTxPage<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct TronTx {
    #[serde(rename = "txID")]
    tx_id: String,
    #[serde(default)]
    ret: Vec<TronRet>,
    raw_data: TronRawData,
}

#[derive(Debug, Deserialize)]
struct TronRet {
    #[serde(rename = "contractRet", default)]
    contract_ret: String,
}

#[derive(Debug, Deserialize)]
struct TronRawData {
    #[serde(default = "Vec::new")]
    contract: Vec<TronContract>,
}

#[derive(Debug, Deserialize)]
struct TronContract {
    #[serde(rename = "type", default)]
    contract_type: String,
    parameter: TronParameter,
}

#[derive(Debug, Deserialize)]
struct TronParameter {
    value: TronTransferValue,
}

#[derive(Debug, Deserialize)]
struct TronTransferValue {
    #[serde(default)]
    amount: i64,
}

#[derive(Debug, Deserialize)]
struct Trc20Tx {
    transaction_id: String,
    token_info: Trc20TokenInfo,
    value: String,
}

#[derive(Debug, Deserialize)]
struct Trc20TokenInfo {
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    decimals: u32,
}

/// `gettransactioninfobyid` answers `{}` for unknown hashes.
#[derive(Debug, Deserialize)]
struct TronTxInfo {
    #[serde(rename = "blockNumber")]
    block_number: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct NowBlock {
    block_header: NowBlockHeader,
}

#[derive(Debug, Deserialize)]
struct NowBlockHeader {
    raw_data: NowBlockRawData,
}

#[derive(Debug, Deserialize)]
struct NowBlockRawData {
    number: i64,
}

impl TronAdapter {
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

    async fn native_txs(&self, base: String, address: &str) -> Result<Vec<TronTx>, EndpointError> {
        let url = join_url(
            &base,
            &format!(
                "v1/accounts/{address}/transactions?only_to=true&only_confirmed=true&limit={PAGE_LIMIT}"
            ),
        );
        let page: AccountTxPage<TronTx> = get_json(&self.client, &url).await?;
        Ok(page.data)
    }

    async fn trc20_txs(&self, base: String, address: &str) -> Result<Vec<Trc20Tx>, EndpointError> {
        let url = join_url(
            &base,
            &format!(
                "v1/accounts/{address}/transactions/trc20?only_to=true&only_confirmed=true&limit={PAGE_LIMIT}"
            ),
        );
        let page: AccountTxPage<Trc20Tx> = get_json(&self.client, &url).await?;
        Ok(page.data)
    }

    async fn confirmations_at(
        &self,
        base: String,
        tx_hash: &str,
    ) -> Result<TxConfirmations, EndpointError> {
        let info_url = join_url(&base, "wallet/gettransactioninfobyid");
        let info: TronTxInfo =
            post_json(&self.client, &info_url, &json!({ "value": tx_hash })).await?;

        let Some(mined) = info.block_number else {
            return Ok(TxConfirmations {
                confirmations: 0,
                found: false,
            });
        };

        let now_url = join_url(&base, "wallet/getnowblock");
        let now: NowBlock = post_json(&self.client, &now_url, &json!({})).await?;
        let head = now.block_header.raw_data.number;

        Ok(TxConfirmations {
            confirmations: head.saturating_sub(mined).saturating_add(1).max(0) as u32,
            found: true,
        })
    }

    fn native_value(tx: &TronTx) -> Decimal {
        let succeeded = tx
            .ret
            .first()
            .is_some_and(|r| r.contract_ret == "SUCCESS");
        if !succeeded {
            return Decimal::ZERO;
        }
        let sun: i64 = tx
            .raw_data
            .contract
            .iter()
            .filter(|c| c.contract_type == "TransferContract")
            .map(|c| c.parameter.value.amount)
            .sum();
        Decimal::new(sun.max(0), SUN_SCALE)
    }
}

#[async_trait]
impl ChainAdapter for TronAdapter {
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
                    .map(|tx| IncomingTx {
                        value_received: Self::native_value(&tx),
                        // only_confirmed=true is part of the query
                        block_confirmed: true,
                        tx_hash: tx.tx_id,
                    })
                    .collect()
            }
            Some(token) => {
                let txs = with_failover(&self.symbol, &self.endpoints, |base| {
                    self.trc20_txs(base, address)
                })
                .await?;
                txs.into_iter()
                    .filter(|tx| tx.token_info.symbol.eq_ignore_ascii_case(token))
                    .map(|tx| IncomingTx {
                        value_received: scale_trc20(&tx.value, tx.token_info.decimals),
                        block_confirmed: true,
                        tx_hash: tx.transaction_id,
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

fn scale_trc20(raw: &str, decimals: u32) -> Decimal {
    let Ok(units) = i128::from_str(raw) else {
        return Decimal::ZERO;
    };
    Decimal::try_from_i128_with_scale(units, decimals.min(28)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_transfer_value() {
        let json = r#"{
            "txID": "f3c1",
            "ret": [{"contractRet": "SUCCESS"}],
            "raw_data": {
                "contract": [{
                    "type": "TransferContract",
                    "parameter": {"value": {"amount": 2500000, "to_address": "41aa", "owner_address": "41bb"}}
                }]
            }
        }"#;
        let tx: TronTx = serde_json::from_str(json).unwrap();
        // 2_500_000 sun = 2.5 TRX
        assert_eq!(TronAdapter::native_value(&tx), Decimal::new(25, 1));
    }

    #[test]
    fn reverted_transfer_counts_zero() {
        let json = r#"{
            "txID": "f3c2",
            "ret": [{"contractRet": "OUT_OF_ENERGY"}],
            "raw_data": {
                "contract": [{
                    "type": "TransferContract",
                    "parameter": {"value": {"amount": 1000000}}
                }]
            }
        }"#;
        let tx: TronTx = serde_json::from_str(json).unwrap();
        assert_eq!(TronAdapter::native_value(&tx), Decimal::ZERO);
    }

    #[test]
    fn trc20_scaling() {
        assert_eq!(scale_trc20("1500000", 6), Decimal::new(15, 1));
        assert_eq!(scale_trc20("junk", 6), Decimal::ZERO);
    }

    #[test]
    fn unknown_hash_deserializes_to_empty_info() {
        let info: TronTxInfo = serde_json::from_str("{}").unwrap();
        assert!(info.block_number.is_none());

        let known: TronTxInfo =
            serde_json::from_str(r#"{"blockNumber": 55000000, "fee": 0}"#).unwrap();
        assert_eq!(known.block_number, Some(55_000_000));
    }

    #[test]
    fn trc20_page_deserializes() {
        let json = r#"{
            "data": [{
                "transaction_id": "ab12",
                "token_info": {"symbol": "USDT", "decimals": 6, "name": "Tether USD"},
                "from": "Tsender",
                "to": "Treceiver",
                "value": "5000000"
            }],
            "success": true
        }"#;
        let page: AccountTxPage<Trc20Tx> = serde_json::from_str(json).unwrap();
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.data[0].token_info.symbol, "USDT");
    }
}
