//! Fluent builder for projection loops.
//!
//! # Example
//!
//! ```rust,no_run
//! use chainsettle_evm::ProjectionBuilder;
//!
//! let config = ProjectionBuilder::new()
//!     .chain("sepolia")
//!     .from_block(5_000_000)
//!     .confirmation_depth(6)
//!     .address("0x7f9e0a1bc2d3e4f5a6b7c8d9e0f1a2b3c4d5e6f7")
//!     .build_config();
//! ```

use std::sync::Arc;

use chainsettle_core::{AggregationEngine, BlockPointer, PointerStore};

use crate::config::ProjectionConfig;
use crate::fetcher::ChainReader;
use crate::projection::ProjectionLoop;

#[derive(Default)]
pub struct ProjectionBuilder {
    config: ProjectionConfig,
}

impl ProjectionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing config (e.g. one loaded from a file).
    pub fn from_config(config: ProjectionConfig) -> Self {
        Self { config }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.config.id = id.into();
        self
    }

    pub fn chain(mut self, chain: impl Into<String>) -> Self {
        self.config.chain = chain.into();
        self
    }

    pub fn from_block(mut self, block: u64) -> Self {
        self.config.from_block = block;
        self
    }

    pub fn to_block(mut self, block: u64) -> Self {
        self.config.to_block = Some(block);
        self
    }

    pub fn confirmation_depth(mut self, depth: u64) -> Self {
        self.config.confirmation_depth = depth;
        self
    }

    /// Blocks per `eth_getLogs` call; at least 1.
    pub fn batch_size(mut self, size: u64) -> Self {
        self.config.batch_size = size.max(1);
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// Watch one more registry contract.
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.config.addresses.push(address.into());
        self
    }

    pub fn build_config(self) -> ProjectionConfig {
        self.config
    }

    /// Wire the loop: the pointer is keyed by this config's `(chain, id)`.
    pub fn build<C: ChainReader>(
        self,
        client: C,
        engine: Arc<AggregationEngine>,
        pointers: Arc<dyn PointerStore>,
    ) -> ProjectionLoop<C> {
        let pointer = BlockPointer::new(pointers, self.config.chain.clone(), self.config.id.clone());
        ProjectionLoop::new(self.config, client, engine, pointer)
    }
}
