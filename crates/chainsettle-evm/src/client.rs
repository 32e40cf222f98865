//! `EvmChainClient`: the chain collaborator behind the consistency facade.
//!
//! Implements [`ReceiptSource`], [`TransactionSubmitter`] and [`ChainReader`]
//! over any [`RpcTransport`].
//!
//! Submission is sent once, never retried by the transport. The hash is
//! computed locally as `keccak256(raw)`, so a submission whose answer was lost
//! (timeout, `already known`) still yields a hash for the receipt waiter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use chainsettle_core::{
    FetchError, ReceiptSource, SubmissionError, TransactionReceipt, TransactionSubmitter, TxHash,
};

use crate::error::TransportError;
use crate::fetcher::{block_from_json, parse_hex_u64, BlockSummary, ChainReader, LogFilter, RawLog};
use crate::registry::keccak256_hex;
use crate::request::{JsonRpcError, JsonRpcRequest};
use crate::revert;
use crate::transport::RpcTransport;

/// JSON-RPC client for one EVM chain.
pub struct EvmChainClient {
    transport: Arc<dyn RpcTransport>,
    next_id: AtomicU64,
}

impl EvmChainClient {
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        self.transport.url()
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let resp = self.transport.send(JsonRpcRequest::new(id, method, params)).await?;
        resp.into_result().map_err(TransportError::Rpc)
    }

    async fn call_once(&self, method: &str, params: Vec<Value>) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let resp = self.transport.send_once(JsonRpcRequest::new(id, method, params)).await?;
        resp.into_result().map_err(TransportError::Rpc)
    }

    /// Send one signed transaction and return its hash.
    ///
    /// `Err` carries the node's message and only for a definite refusal. A lost
    /// answer or a node that already holds the transaction yields the local hash.
    async fn send_raw(&self, raw: &str) -> Result<TxHash, String> {
        let bytes = hex::decode(raw.trim_start_matches("0x"))
            .map_err(|e| format!("raw transaction is not valid hex: {e}"))?;
        let local = keccak256_hex(&bytes);

        let err = match self.call_once("eth_sendRawTransaction", vec![json!(raw)]).await {
            Ok(result) => {
                return result
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| format!("unexpected eth_sendRawTransaction result: {result}"))
            }
            Err(e) => e,
        };

        match err {
            e if e.delivery_unknown() => {
                tracing::warn!(tx = %local, error = %e, "submission answer lost; waiting on local hash");
                Ok(local)
            }
            TransportError::Rpc(err) if already_known(&err) => {
                tracing::debug!(tx = %local, "node already holds transaction");
                Ok(local)
            }
            TransportError::Rpc(err) if err.message.to_ascii_lowercase().contains("nonce too low") => {
                // our own earlier delivery may have consumed the nonce
                match self.call("eth_getTransactionByHash", vec![json!(local)]).await {
                    Ok(tx) if !tx.is_null() => {
                        tracing::debug!(tx = %local, "nonce already used by this transaction");
                        Ok(local)
                    }
                    _ => Err(err.message),
                }
            }
            TransportError::Rpc(err) => Err(err.message),
            other => Err(other.to_string()),
        }
    }

    /// Replay a reverted transaction with `eth_call` against the parent block
    /// and decode whatever the node returns. `None` when nothing usable comes
    /// back; a replay that succeeds means the revert depended on in-block state.
    async fn revert_reason(&self, hash: &str, block_number: u64) -> Option<String> {
        let tx = match self.call("eth_getTransactionByHash", vec![json!(hash)]).await {
            Ok(tx) if !tx.is_null() => tx,
            Ok(_) => return None,
            Err(e) => {
                tracing::debug!(tx = hash, error = %e, "could not load reverted transaction");
                return None;
            }
        };

        let mut call = json!({
            "from": tx["from"],
            "data": tx["input"],
            "value": tx["value"],
            "gas": tx["gas"],
        });
        if !tx["to"].is_null() {
            call["to"] = tx["to"].clone();
        }
        let at = format!("0x{:x}", block_number.saturating_sub(1));

        match self.call("eth_call", vec![call, json!(at)]).await {
            Err(TransportError::Rpc(err)) => revert::reason_from_rpc_error(&err),
            Err(e) => {
                tracing::debug!(tx = hash, error = %e, "revert replay failed");
                None
            }
            Ok(_) => None,
        }
    }
}

/// Convert an `eth_getTransactionReceipt` result. Receipts without a block
/// number are still pending.
fn parse_receipt(hash: &str, v: &Value) -> Result<Option<(TransactionReceipt, bool)>, FetchError> {
    if v.is_null() {
        return Ok(None);
    }
    let block_number = match v["blockNumber"].as_str() {
        Some(s) => parse_hex_u64(s)
            .ok_or_else(|| FetchError::Malformed(format!("bad blockNumber {s:?} in receipt {hash}")))?,
        None => return Ok(None),
    };
    // Pre-Byzantium receipts have no status field; they can only be reported as mined.
    let reverted = match v["status"].as_str() {
        Some("0x1") | None => false,
        Some("0x0") => true,
        Some(other) => {
            return Err(FetchError::Malformed(format!(
                "unknown receipt status {other:?} for {hash}"
            )))
        }
    };
    let receipt = if reverted {
        TransactionReceipt::reverted(hash, block_number, None)
    } else {
        TransactionReceipt::success(hash, block_number)
    };
    Ok(Some((receipt, reverted)))
}

#[async_trait]
impl ReceiptSource for EvmChainClient {
    async fn receipt(&self, hash: &str) -> Result<Option<TransactionReceipt>, FetchError> {
        let value = self
            .call("eth_getTransactionReceipt", vec![json!(hash)])
            .await?;
        let Some((mut receipt, reverted)) = parse_receipt(hash, &value)? else {
            return Ok(None);
        };
        if reverted {
            receipt.revert_reason = self.revert_reason(hash, receipt.block_number).await;
        }
        Ok(Some(receipt))
    }
}

#[async_trait]
impl TransactionSubmitter for EvmChainClient {
    /// Signed raw transactions, hex-encoded.
    type Call = Vec<String>;

    async fn submit(&self, call: &Vec<String>) -> Result<Vec<TxHash>, SubmissionError> {
        let mut hashes = Vec::with_capacity(call.len());
        for raw in call {
            let hash = self.send_raw(raw).await.map_err(|msg| {
                if hashes.is_empty() {
                    SubmissionError::new(msg)
                } else {
                    SubmissionError::new(format!("{msg} (already submitted: {})", hashes.join(", ")))
                }
            })?;
            tracing::debug!(tx = %hash, "transaction submitted");
            hashes.push(hash);
        }
        Ok(hashes)
    }
}

/// Node messages meaning the transaction is already in its pool or chain.
fn already_known(err: &JsonRpcError) -> bool {
    let msg = err.message.to_ascii_lowercase();
    ["already known", "known transaction", "already imported", "alreadyknown"]
        .iter()
        .any(|m| msg.contains(m))
}

#[async_trait]
impl ChainReader for EvmChainClient {
    async fn block_number(&self) -> Result<u64, FetchError> {
        let v = self.call("eth_blockNumber", vec![]).await?;
        v.as_str()
            .and_then(parse_hex_u64)
            .ok_or_else(|| FetchError::Malformed(format!("bad eth_blockNumber result: {v}")))
    }

    async fn block(&self, number: u64) -> Result<Option<BlockSummary>, FetchError> {
        let v = self
            .call("eth_getBlockByNumber", vec![json!(format!("0x{number:x}")), json!(false)])
            .await?;
        if v.is_null() {
            return Ok(None);
        }
        block_from_json(&v)
            .map(Some)
            .ok_or_else(|| FetchError::Malformed(format!("bad block {number}")))
    }

    async fn logs(&self, from: u64, to: u64, filter: &LogFilter) -> Result<Vec<RawLog>, FetchError> {
        let v = self.call("eth_getLogs", vec![filter.to_params(from, to)]).await?;
        serde_json::from_value(v).map_err(|e| FetchError::Malformed(e.to_string()))
    }
}
