//! Solana chain adapter (JSON-RPC).
//!
//! Incoming value is derived from `getSignaturesForAddress` plus a
//! `getTransaction` lookup per signature: the lamport delta of the queried
//! address between pre- and post-balances is the value received. All
//! lookups for one logical call go to the same endpoint; failover swaps
//! the whole call to the next endpoint.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::endpoints::{EndpointError, http_client, post_json, with_failover};
use super::{ChainAdapter, ChainError, IncomingTx, TxConfirmations};

const LAMPORT_SCALE: u32 = 9;
const SIGNATURE_PAGE: u32 = 25;
/// RPC reports `confirmations: null` once a signature is rooted; map that
/// to the finality depth so threshold comparisons stay uniform.
const FINALIZED_DEPTH: u32 = 32;

pub struct SolanaAdapter {
    symbol: String,
    endpoints: Vec<String>,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct RpcRequest<T> {
    jsonrpc: &'static str,
    method: &'static str,
    params: T,
    id: u64,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignatureInfo {
    signature: String,
    err: Option<serde_json::Value>,
    confirmation_status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransactionResult {
    meta: Option<TransactionMeta>,
    transaction: TransactionBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionMeta {
    err: Option<serde_json::Value>,
    pre_balances: Vec<u64>,
    post_balances: Vec<u64>,
}

#[derive(Debug, Deserialize)]
struct TransactionBody {
    message: TransactionMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionMessage {
    account_keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct StatusesResult {
    value: Vec<Option<SignatureStatus>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignatureStatus {
    confirmations: Option<u64>,
    #[allow(dead_code)]
    confirmation_status: Option<String>,
}

impl SolanaAdapter {
    pub fn new(symbol: String, endpoints: Vec<String>) -> Result<Self, ChainError> {
        Ok(Self {
            symbol,
            endpoints,
            client: http_client()?,
        })
    }

    async fn rpc_call<T, R>(
        &self,
        base: &str,
        method: &'static str,
        params: T,
    ) -> Result<R, EndpointError>
    where
        T: Serialize,
        R: for<'de> Deserialize<'de>,
    {
        let request = RpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: 1,
        };
        let response: RpcResponse<R> = post_json(&self.client, base, &request).await?;
        if let Some(error) = response.error {
            return Err(EndpointError::Payload(format!(
                "rpc error {}: {}",
                error.code, error.message
            )));
        }
        response
            .result
            .ok_or_else(|| EndpointError::Payload("no result in rpc response".to_string()))
    }

    /// Whole logical "list incoming" call against one endpoint.
    async fn incoming_at(
        &self,
        base: String,
        address: &str,
    ) -> Result<Vec<IncomingTx>, EndpointError> {
        let signatures: Vec<SignatureInfo> = self
            .rpc_call(
                &base,
                "getSignaturesForAddress",
                json!([address, { "limit": SIGNATURE_PAGE }]),
            )
            .await?;

        let mut incoming = Vec::new();
        for sig in signatures.into_iter().filter(|s| s.err.is_none()) {
            let tx: Option<TransactionResult> = self
                .rpc_call(
                    &base,
                    "getTransaction",
                    json!([
                        sig.signature,
                        { "encoding": "json", "maxSupportedTransactionVersion": 0 }
                    ]),
                )
                .await?;
            let Some(tx) = tx else { continue };
            let Some(meta) = tx.meta else { continue };
            if meta.err.is_some() {
                continue;
            }

            let Some(index) = tx
                .transaction
                .message
                .account_keys
                .iter()
                .position(|key| key == address)
            else {
                continue;
            };
            let pre = meta.pre_balances.get(index).copied().unwrap_or(0);
            let post = meta.post_balances.get(index).copied().unwrap_or(0);

            incoming.push(IncomingTx {
                value_received: lamport_delta(pre, post),
                block_confirmed: matches!(
                    sig.confirmation_status.as_deref(),
                    Some("confirmed") | Some("finalized")
                ),
                tx_hash: sig.signature,
            });
        }
        Ok(incoming)
    }

    async fn confirmations_at(
        &self,
        base: String,
        tx_hash: &str,
    ) -> Result<TxConfirmations, EndpointError> {
        let statuses: StatusesResult = self
            .rpc_call(
                &base,
                "getSignatureStatuses",
                json!([[tx_hash], { "searchTransactionHistory": true }]),
            )
            .await?;

        match statuses.value.into_iter().next().flatten() {
            None => Ok(TxConfirmations {
                confirmations: 0,
                found: false,
            }),
            Some(status) => Ok(TxConfirmations {
                confirmations: status
                    .confirmations
                    .map_or(FINALIZED_DEPTH, |c| c.min(u64::from(u32::MAX)) as u32),
                found: true,
            }),
        }
    }
}

#[async_trait]
impl ChainAdapter for SolanaAdapter {
    fn chain_symbol(&self) -> &str {
        &self.symbol
    }

    async fn list_incoming(&self, address: &str) -> Result<Vec<IncomingTx>, ChainError> {
        let incoming = with_failover(&self.symbol, &self.endpoints, |base| {
            self.incoming_at(base, address)
        })
        .await?;
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

/// Lamports gained by the address in this transaction. Negative deltas
/// (the address spent) clamp to zero and get skipped by the scanner.
fn lamport_delta(pre: u64, post: u64) -> Decimal {
    let delta = post.saturating_sub(pre);
    Decimal::new(delta as i64, LAMPORT_SCALE)
}
