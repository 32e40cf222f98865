//! chainsettle-core: read-after-write consistency between a chain and its indexer.
//!
//! # Architecture
//!
//! ```text
//! caller → ConsistencyFacade
//!              ├── ReceiptWaiter   (chain receipts, fan-out per hash)
//!              └── IndexingWaiter  (indexer progress pointer)
//!                        both run on PollPolicy (deadline + interval + Condition)
//!
//! event feed → AggregationEngine → AggregateStore (state + snapshots + applied ids)
//!                                → BlockPointer   (highest fully projected block)
//! ```

pub mod aggregate;
pub mod config;
pub mod consistency;
pub mod error;
pub mod indexing;
pub mod pointer;
pub mod policy;
pub mod receipt;
pub mod types;

pub use aggregate::{
    AggregateState, AggregateStore, AggregationEngine, Applied, Counters, EventKind,
    MemoryAggregateStore, RegistryEvent, RegistryKind, StatsSnapshot,
};
pub use config::SettleConfig;
pub use consistency::{ConsistencyFacade, TransactionSubmitter};
pub use error::{FetchError, ProjectionError, SettleError, SubmissionError};
pub use indexing::{IndexerStatus, IndexingWaiter};
pub use pointer::{BlockPointer, Checkpoint, MemoryPointerStore, PointerStore};
pub use policy::{Attempt, Condition, PollError, PollPolicy};
pub use receipt::{ReceiptSource, ReceiptWaiter};
pub use types::{ReceiptStatus, TransactionReceipt, TxHash};
