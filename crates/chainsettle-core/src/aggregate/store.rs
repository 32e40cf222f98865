//! Storage contract for aggregates, snapshots and applied-event ids.

use async_trait::async_trait;

use super::types::{AggregateState, EventId, StatsSnapshot};
use crate::error::ProjectionError;

/// Result of loading a registry's aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadedAggregate {
    Found(AggregateState),
    /// The registry has never seen an event.
    NotFound,
}

/// Everything one projected event writes, committed as a unit.
#[derive(Debug, Clone)]
pub struct AggregateCommit {
    pub event_id: EventId,
    pub state: AggregateState,
    pub snapshot: StatsSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// The event id was already recorded; nothing was written.
    Duplicate,
}

/// Inclusive timestamp bounds for snapshot queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotRange {
    pub from: Option<i64>,
    pub to: Option<i64>,
}

impl SnapshotRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(from: i64, to: i64) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        self.from.map_or(true, |f| timestamp >= f) && self.to.map_or(true, |t| timestamp <= t)
    }
}

/// Backend for the aggregation engine.
///
/// `commit` is the atomic unit: it records the event id, upserts the state and
/// appends the snapshot together, or writes nothing. Readers must never see a
/// state without its snapshot or the reverse.
///
/// Claim links map `keccak256(claim signature)` to the identity that holds the
/// claim. Revocations are emitted by the issuer and only carry that hash.
#[async_trait]
pub trait AggregateStore: Send + Sync {
    async fn load(&self, registry_id: &str) -> Result<LoadedAggregate, ProjectionError>;

    /// `true` for committed and rejected event ids alike.
    async fn is_applied(&self, event_id: &EventId) -> Result<bool, ProjectionError>;

    async fn commit(&self, commit: AggregateCommit) -> Result<CommitOutcome, ProjectionError>;

    /// Record an event that was refused, so redelivery skips it. No aggregate
    /// or snapshot is touched.
    async fn reject(&self, event_id: EventId, reason: &str) -> Result<CommitOutcome, ProjectionError>;

    async fn link_claim(&self, signature_hash: &str, registry_id: &str) -> Result<(), ProjectionError>;

    async fn claim_registry(&self, signature_hash: &str) -> Result<Option<String>, ProjectionError>;

    /// Snapshots of one registry in creation order, filtered by timestamp.
    async fn snapshots(
        &self,
        registry_id: &str,
        range: SnapshotRange,
    ) -> Result<Vec<StatsSnapshot>, ProjectionError>;
}
