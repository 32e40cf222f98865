//! Indexer progress read from a GraphQL endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use chainsettle_core::{FetchError, IndexerStatus};

use crate::error::TransportError;

/// Query understood by subgraph-style indexers.
pub const META_QUERY: &str = "{ _meta { block { number } } }";
/// Where the block number sits in the response to [`META_QUERY`].
pub const META_POINTER: &str = "/data/_meta/block/number";

/// [`IndexerStatus`] backed by a GraphQL `_meta` query.
pub struct GraphQlIndexerStatus {
    url: String,
    http: reqwest::Client,
    query: String,
    pointer: String,
}

impl GraphQlIndexerStatus {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| TransportError::Other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            url: url.into(),
            http,
            query: META_QUERY.to_string(),
            pointer: META_POINTER.to_string(),
        })
    }

    /// Use a custom query; `pointer` is a JSON pointer to the block number
    /// in the response.
    pub fn with_query(mut self, query: impl Into<String>, pointer: impl Into<String>) -> Self {
        self.query = query.into();
        self.pointer = pointer.into();
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Pull the indexed block out of a GraphQL response body.
///
/// Numbers may arrive as JSON numbers, decimal strings or hex strings.
pub fn block_from_response(body: &Value, pointer: &str) -> Result<u64, FetchError> {
    if let Some(errors) = body.get("errors").and_then(Value::as_array) {
        if let Some(first) = errors.first() {
            let msg = first["message"].as_str().unwrap_or("unknown GraphQL error");
            return Err(FetchError::Unavailable(msg.to_string()));
        }
    }
    let value = body
        .pointer(pointer)
        .ok_or_else(|| FetchError::Malformed(format!("no value at {pointer}")))?;
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => match s.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16).ok(),
            None => s.parse().ok(),
        },
        _ => None,
    };
    parsed.ok_or_else(|| FetchError::Malformed(format!("not a block number: {value}")))
}

#[async_trait]
impl IndexerStatus for GraphQlIndexerStatus {
    async fn indexed_block(&self) -> Result<u64, FetchError> {
        let resp = self
            .http
            .post(&self.url)
            .json(&json!({ "query": self.query }))
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(FetchError::Unavailable(format!("HTTP {}", resp.status().as_u16())));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| FetchError::Malformed(e.to_string()))?;
        block_from_response(&body, &self.pointer)
    }
}
