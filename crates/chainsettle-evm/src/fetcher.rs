//! Block and log reads used by the projection loop.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use chainsettle_core::FetchError;

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "blockHash", default)]
    pub block_hash: String,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl RawLog {
    pub fn block_number_u64(&self) -> Option<u64> {
        parse_hex_u64(&self.block_number)
    }

    pub fn log_index_u32(&self) -> Option<u32> {
        parse_hex_u64(&self.log_index).and_then(|i| u32::try_from(i).ok())
    }

    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }
}

/// Minimal block header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    pub number: u64,
    pub hash: String,
    pub parent_hash: String,
    /// Unix seconds.
    pub timestamp: i64,
}

/// Which logs `eth_getLogs` should return.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogFilter {
    /// Contract addresses; empty means any address.
    pub addresses: Vec<String>,
    /// Accepted `topics[0]` values; empty means any event.
    pub topic0: Vec<String>,
}

impl LogFilter {
    /// Client-side check, for nodes that ignore part of the filter.
    pub fn matches(&self, log: &RawLog) -> bool {
        let address_ok = self.addresses.is_empty()
            || self.addresses.iter().any(|a| a.eq_ignore_ascii_case(&log.address));
        let topic_ok = self.topic0.is_empty()
            || log
                .topics
                .first()
                .map_or(false, |t| self.topic0.iter().any(|x| x.eq_ignore_ascii_case(t)));
        address_ok && topic_ok
    }

    /// `eth_getLogs` filter object for the inclusive range `[from, to]`.
    pub fn to_params(&self, from: u64, to: u64) -> Value {
        let mut filter = json!({
            "fromBlock": format!("0x{from:x}"),
            "toBlock": format!("0x{to:x}"),
        });
        if !self.addresses.is_empty() {
            filter["address"] = json!(self.addresses);
        }
        if !self.topic0.is_empty() {
            filter["topics"] = json!([self.topic0]);
        }
        filter
    }
}

/// Chain reads the projection loop depends on.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn block_number(&self) -> Result<u64, FetchError>;
    async fn block(&self, number: u64) -> Result<Option<BlockSummary>, FetchError>;
    async fn logs(&self, from: u64, to: u64, filter: &LogFilter) -> Result<Vec<RawLog>, FetchError>;
}

/// Parse a hex quantity (with or without `0x`).
pub fn parse_hex_u64(s: &str) -> Option<u64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).ok()
}

/// Convert an `eth_getBlockByNumber` result into a [`BlockSummary`].
pub fn block_from_json(v: &Value) -> Option<BlockSummary> {
    Some(BlockSummary {
        number: parse_hex_u64(v["number"].as_str()?)?,
        hash: v["hash"].as_str()?.to_string(),
        parent_hash: v["parentHash"].as_str()?.to_string(),
        timestamp: parse_hex_u64(v["timestamp"].as_str()?)? as i64,
    })
}
