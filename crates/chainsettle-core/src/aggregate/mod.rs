//! Registry aggregation: running counters plus an append-only snapshot
//! series per registry, maintained from decoded domain events.

pub mod engine;
pub mod memory;
pub mod store;
pub mod types;

pub use engine::{AggregationEngine, Applied, BatchSummary};
pub use memory::MemoryAggregateStore;
pub use store::{AggregateCommit, AggregateStore, CommitOutcome, LoadedAggregate, SnapshotRange};
pub use types::{
    AggregateState, Counters, EventId, EventKind, EventPosition, RegistryEvent, RegistryKind,
    StatsSnapshot,
};
