//! chainsettle-evm: EVM adapters for the consistency bridge.
//!
//! - [`client::EvmChainClient`]: receipts, raw-tx submission, blocks and logs over JSON-RPC
//! - [`graphql::GraphQlIndexerStatus`]: indexer progress via `_meta { block { number } }`
//! - [`revert`]: best-effort revert reason decoding
//! - [`registry::RegistryDecoder`]: ERC-3643 registry logs → [`RegistryEvent`](chainsettle_core::RegistryEvent)
//! - [`projection::ProjectionLoop`]: confirmed-block index loop feeding the aggregation engine

pub mod builder;
pub mod client;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod graphql;
pub mod projection;
pub mod registry;
pub mod request;
pub mod retry;
pub mod revert;
pub mod tracker;
pub mod transport;

pub use builder::ProjectionBuilder;
pub use client::EvmChainClient;
pub use config::{ProjectionConfig, ProjectionState};
pub use error::TransportError;
pub use fetcher::{BlockSummary, ChainReader, LogFilter, RawLog};
pub use graphql::GraphQlIndexerStatus;
pub use projection::ProjectionLoop;
pub use registry::RegistryDecoder;
pub use transport::{HttpTransport, HttpTransportConfig, RpcTransport};
