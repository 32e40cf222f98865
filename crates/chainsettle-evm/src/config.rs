//! Projection loop configuration and state types.

use serde::{Deserialize, Serialize};

/// Configuration for a projection loop instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionConfig {
    /// Pointer key; one pointer per `(chain, id)`.
    #[serde(default = "default_id")]
    pub id: String,
    #[serde(default = "default_chain")]
    pub chain: String,
    /// First block to project when no pointer exists.
    #[serde(default)]
    pub from_block: u64,
    /// Stop after this block. `None` = follow the chain forever.
    #[serde(default)]
    pub to_block: Option<u64>,
    /// Blocks behind head before a block is projected.
    #[serde(default = "default_confirmation_depth")]
    pub confirmation_depth: u64,
    /// Blocks per `eth_getLogs` call during backfill.
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    /// Head polling interval in live mode.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Registry contracts to watch; empty watches every emitter.
    #[serde(default)]
    pub addresses: Vec<String>,
}

fn default_id() -> String { "registries".into() }
fn default_chain() -> String { "ethereum".into() }
fn default_confirmation_depth() -> u64 { 12 }
fn default_batch_size() -> u64 { 1000 }
fn default_poll_interval_ms() -> u64 { 2000 }

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            id: default_id(),
            chain: default_chain(),
            from_block: 0,
            to_block: None,
            confirmation_depth: default_confirmation_depth(),
            batch_size: default_batch_size(),
            poll_interval_ms: default_poll_interval_ms(),
            addresses: Vec::new(),
        }
    }
}

impl ProjectionConfig {
    /// Highest block that may be projected when the chain head is `head`.
    pub fn confirmed_head(&self, head: u64) -> Option<u64> {
        head.checked_sub(self.confirmation_depth)
    }
}

/// Runtime state of the projection loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectionState {
    /// Not yet started.
    Idle,
    /// Catching up to the confirmed head in batches.
    Backfilling,
    /// Following the confirmed head block by block.
    Live,
    /// Reached `to_block`.
    Stopped,
    /// Terminated by an error.
    Error,
}

impl std::fmt::Display for ProjectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Backfilling => write!(f, "backfilling"),
            Self::Live => write!(f, "live"),
            Self::Stopped => write!(f, "stopped"),
            Self::Error => write!(f, "error"),
        }
    }
}
