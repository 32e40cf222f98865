//! Aggregation engine: projects registry events into counters + snapshots.
//!
//! Per event, under the registry's lock:
//!
//! ```text
//! is_applied(id)? → Duplicate
//! load(registry)  → Found(state) | NotFound → zero state
//! check ordering, apply transition
//! commit(id, state, snapshot)   (atomic)
//! ```
//!
//! An event that is invalid for its registry (underflow, unsupported
//! transition, kind mismatch) is recorded as rejected under its id and logged.
//! It leaves the aggregate untouched and does not stop the batch.
//!
//! Registries are independent: different registries project in parallel.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use super::store::{AggregateCommit, AggregateStore, CommitOutcome, LoadedAggregate, SnapshotRange};
use super::types::{AggregateState, EventKind, RegistryEvent, StatsSnapshot};
use crate::error::ProjectionError;

/// What `apply` did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// Counters changed; this is the snapshot that was appended.
    Projected(StatsSnapshot),
    /// The event had already been applied; nothing changed.
    Duplicate,
    /// The event is invalid for its registry; only its id was recorded.
    Rejected { reason: String },
}

/// Counts from [`AggregationEngine::apply_batch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub projected: usize,
    pub duplicates: usize,
    pub rejected: usize,
}

pub struct AggregationEngine {
    store: Arc<dyn AggregateStore>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AggregationEngine {
    pub fn new(store: Arc<dyn AggregateStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn AggregateStore> {
        &self.store
    }

    fn registry_lock(&self, registry_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap()
            .entry(registry_id.to_string())
            .or_default()
            .clone()
    }

    /// Project one event. Events of one registry must arrive in
    /// `(block_number, log_index)` order.
    pub async fn apply(&self, event: &RegistryEvent) -> Result<Applied, ProjectionError> {
        let lock = self.registry_lock(&event.registry_id);
        let _guard = lock.lock().await;

        let event_id = event.id();
        if self.store.is_applied(&event_id).await? {
            debug!(event = %event_id, registry = %event.registry_id, "duplicate event skipped");
            return Ok(Applied::Duplicate);
        }

        let mut state = match self.store.load(&event.registry_id).await? {
            LoadedAggregate::Found(state) => state,
            LoadedAggregate::NotFound => {
                debug!(registry = %event.registry_id, kind = %event.registry_kind, "new registry");
                AggregateState::new(event.registry_id.clone(), event.registry_kind)
            }
        };

        let transition = self.check(&state, event).and_then(|()| {
            state.counters.apply(event.kind).ok_or_else(|| ProjectionError::CounterUnderflow {
                registry_id: event.registry_id.clone(),
                kind: event.kind,
            })
        });
        state.counters = match transition {
            Ok(counters) => counters,
            Err(e) if e.is_invalid_transition() => {
                let reason = e.to_string();
                warn!(event = %event_id, registry = %event.registry_id, reason = %reason, "event rejected");
                return Ok(match self.store.reject(event_id, &reason).await? {
                    CommitOutcome::Committed => Applied::Rejected { reason },
                    CommitOutcome::Duplicate => Applied::Duplicate,
                });
            }
            Err(e) => return Err(e),
        };
        state.last_position = Some(event.position());
        state.version += 1;
        state.updated_at = event.timestamp;

        let snapshot = StatsSnapshot {
            registry_id: state.registry_id.clone(),
            registry_kind: state.registry_kind,
            sequence: state.version,
            counters: state.counters,
            event_id: event_id.clone(),
            kind: event.kind,
            block_number: event.block_number,
            log_index: event.log_index,
            timestamp: event.timestamp,
        };

        let outcome = self
            .store
            .commit(AggregateCommit {
                event_id,
                state,
                snapshot: snapshot.clone(),
            })
            .await?;

        match outcome {
            CommitOutcome::Committed => {
                debug!(
                    registry = %snapshot.registry_id,
                    kind = %snapshot.kind,
                    active = snapshot.counters.active,
                    sequence = snapshot.sequence,
                    "event projected"
                );
                Ok(Applied::Projected(snapshot))
            }
            CommitOutcome::Duplicate => Ok(Applied::Duplicate),
        }
    }

    fn check(&self, state: &AggregateState, event: &RegistryEvent) -> Result<(), ProjectionError> {
        if state.registry_kind != event.registry_kind {
            return Err(ProjectionError::RegistryKindMismatch {
                registry_id: event.registry_id.clone(),
                existing: state.registry_kind,
                incoming: event.registry_kind,
            });
        }
        if event.kind == EventKind::Revoked && !state.registry_kind.supports_revocation() {
            return Err(ProjectionError::UnsupportedTransition {
                registry_id: event.registry_id.clone(),
                registry_kind: state.registry_kind,
                kind: event.kind,
            });
        }
        if let Some(last) = state.last_position {
            if event.position() <= last {
                return Err(ProjectionError::OutOfOrder {
                    registry_id: event.registry_id.clone(),
                    last,
                    got: event.position(),
                });
            }
        }
        Ok(())
    }

    /// Project a batch: in order within each registry, registries in parallel.
    ///
    /// Rejected events are counted and skipped. Every registry group runs to
    /// completion or to its first error; the first error encountered is
    /// returned after all groups finish.
    pub async fn apply_batch(&self, events: &[RegistryEvent]) -> Result<BatchSummary, ProjectionError> {
        let mut by_registry: BTreeMap<&str, Vec<&RegistryEvent>> = BTreeMap::new();
        for event in events {
            by_registry.entry(event.registry_id.as_str()).or_default().push(event);
        }

        let groups = by_registry.into_values().map(|group| async move {
            let mut summary = BatchSummary::default();
            for event in group {
                match self.apply(event).await? {
                    Applied::Projected(_) => summary.projected += 1,
                    Applied::Duplicate => summary.duplicates += 1,
                    Applied::Rejected { .. } => summary.rejected += 1,
                }
            }
            Ok::<_, ProjectionError>(summary)
        });

        let mut total = BatchSummary::default();
        let mut first_err = None;
        for result in futures::future::join_all(groups).await {
            match result {
                Ok(s) => {
                    total.projected += s.projected;
                    total.duplicates += s.duplicates;
                    total.rejected += s.rejected;
                }
                Err(e) => {
                    warn!(error = %e, "registry projection failed");
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }

    /// Current state of a registry, if it has seen any event.
    pub async fn aggregate(&self, registry_id: &str) -> Result<Option<AggregateState>, ProjectionError> {
        Ok(match self.store.load(registry_id).await? {
            LoadedAggregate::Found(state) => Some(state),
            LoadedAggregate::NotFound => None,
        })
    }

    pub async fn snapshots(
        &self,
        registry_id: &str,
        range: SnapshotRange,
    ) -> Result<Vec<StatsSnapshot>, ProjectionError> {
        self.store.snapshots(registry_id, range).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::memory::MemoryAggregateStore;
    use crate::aggregate::types::{Counters, RegistryKind};

    fn event(registry: &str, kind: EventKind, block: u64, log: u32) -> RegistryEvent {
        RegistryEvent {
            registry_id: registry.into(),
            registry_kind: RegistryKind::IdentityClaim,
            kind,
            tx_hash: format!("0x{block:x}{log:02x}"),
            block_number: block,
            log_index: log,
            timestamp: 1_700_000_000 + block as i64 * 12,
        }
    }

    fn engine() -> (AggregationEngine, Arc<MemoryAggregateStore>) {
        let store = Arc::new(MemoryAggregateStore::new());
        (AggregationEngine::new(store.clone()), store)
    }

    #[tokio::test]
    async fn added_added_removed() {
        let (engine, _) = engine();
        for e in [
            event("0xr", EventKind::Added, 1, 0),
            event("0xr", EventKind::Added, 2, 0),
            event("0xr", EventKind::Removed, 3, 0),
        ] {
            engine.apply(&e).await.unwrap();
        }

        let state = engine.aggregate("0xr").await.unwrap().unwrap();
        assert_eq!(state.counters, Counters { added: 2, active: 1, removed: 1, revoked: 0 });
        assert_eq!(state.version, 3);

        let snaps = engine.snapshots("0xr", SnapshotRange::all()).await.unwrap();
        let active: Vec<u64> = snaps.iter().map(|s| s.counters.active).collect();
        assert_eq!(active, vec![1, 2, 1]);
        assert_eq!(snaps.iter().map(|s| s.sequence).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(snaps.last().unwrap().counters, state.counters);
    }

    #[tokio::test]
    async fn redelivery_is_idempotent() {
        let (engine, store) = engine();
        let e = event("0xr", EventKind::Added, 5, 2);
        assert!(matches!(engine.apply(&e).await.unwrap(), Applied::Projected(_)));
        assert_eq!(engine.apply(&e).await.unwrap(), Applied::Duplicate);

        let state = engine.aggregate("0xr").await.unwrap().unwrap();
        assert_eq!(state.counters.added, 1);
        assert_eq!(store.snapshot_count(), 1);
    }

    #[tokio::test]
    async fn out_of_order_event_rejected_without_mutation() {
        let (engine, _) = engine();
        engine.apply(&event("0xr", EventKind::Added, 10, 3)).await.unwrap();
        let err = engine
            .apply(&event("0xr", EventKind::Added, 10, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, ProjectionError::OutOfOrder { .. }));
        assert_eq!(engine.aggregate("0xr").await.unwrap().unwrap().counters.added, 1);
    }

    #[tokio::test]
    async fn underflow_rejected() {
        let (engine, store) = engine();
        let removed = event("0xr", EventKind::Removed, 1, 0);
        let outcome = engine.apply(&removed).await.unwrap();
        assert!(matches!(outcome, Applied::Rejected { ref reason } if reason.contains("below zero")));
        assert!(engine.aggregate("0xr").await.unwrap().is_none());
        assert_eq!(store.snapshot_count(), 0);
        assert!(store.rejection(&removed.id()).is_some());

        // redelivery of a rejected event is a no-op
        assert_eq!(engine.apply(&removed).await.unwrap(), Applied::Duplicate);
    }

    #[tokio::test]
    async fn revocation_only_for_claims() {
        let (engine, _) = engine();
        let mut add = event("0xissuers", EventKind::Added, 1, 0);
        add.registry_kind = RegistryKind::TrustedIssuer;
        engine.apply(&add).await.unwrap();

        let mut revoke = event("0xissuers", EventKind::Revoked, 2, 0);
        revoke.registry_kind = RegistryKind::TrustedIssuer;
        assert!(matches!(engine.apply(&revoke).await.unwrap(), Applied::Rejected { .. }));
        let issuers = engine.aggregate("0xissuers").await.unwrap().unwrap();
        assert_eq!(issuers.counters.active, 1);

        engine.apply(&event("0xclaims", EventKind::Added, 1, 1)).await.unwrap();
        engine.apply(&event("0xclaims", EventKind::Revoked, 2, 1)).await.unwrap();
        let claims = engine.aggregate("0xclaims").await.unwrap().unwrap();
        assert_eq!(claims.counters, Counters { added: 1, active: 0, removed: 0, revoked: 1 });
    }

    #[tokio::test]
    async fn kind_mismatch_rejected() {
        let (engine, store) = engine();
        engine.apply(&event("0xr", EventKind::Added, 1, 0)).await.unwrap();
        let mut other = event("0xr", EventKind::Added, 2, 0);
        other.registry_kind = RegistryKind::ComplianceModule;
        match engine.apply(&other).await.unwrap() {
            Applied::Rejected { reason } => assert!(reason.contains("compliance")),
            other => panic!("expected rejection, got {other:?}"),
        }
        assert!(store.rejection(&other.id()).is_some());
        assert_eq!(engine.aggregate("0xr").await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn invariant_holds_after_every_apply() {
        let (engine, _) = engine();
        // deterministic pseudo-random walk over three registries
        let mut seed = 0x2545_f491_u64;
        let mut block = 0u64;
        for _ in 0..300 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            block += 1;
            let registry = ["0xa", "0xb", "0xc"][(seed % 3) as usize];
            let kind = match (seed >> 8) % 4 {
                0 | 1 => EventKind::Added,
                2 => EventKind::Removed,
                _ => EventKind::Revoked,
            };
            let _ = engine.apply(&event(registry, kind, block, 0)).await;
            if let Some(state) = engine.aggregate(registry).await.unwrap() {
                assert!(state.counters.is_consistent(), "{:?}", state.counters);
            }
        }
        for registry in ["0xa", "0xb", "0xc"] {
            for snap in engine.snapshots(registry, SnapshotRange::all()).await.unwrap() {
                assert!(snap.counters.is_consistent());
            }
        }
    }

    #[tokio::test]
    async fn batch_groups_by_registry() {
        let (engine, _) = engine();
        let events = vec![
            event("0xa", EventKind::Added, 1, 0),
            event("0xb", EventKind::Added, 1, 1),
            event("0xa", EventKind::Added, 1, 2),
            event("0xa", EventKind::Removed, 2, 0),
            event("0xb", EventKind::Added, 2, 1),
        ];
        let summary = engine.apply_batch(&events).await.unwrap();
        assert_eq!(summary, BatchSummary { projected: 5, duplicates: 0, rejected: 0 });

        let again = engine.apply_batch(&events).await.unwrap();
        assert_eq!(again, BatchSummary { projected: 0, duplicates: 5, rejected: 0 });

        assert_eq!(engine.aggregate("0xa").await.unwrap().unwrap().counters.active, 1);
        assert_eq!(engine.aggregate("0xb").await.unwrap().unwrap().counters.active, 2);
    }

    #[tokio::test]
    async fn rejected_event_does_not_stop_its_registry() {
        let (engine, _) = engine();
        let events = vec![
            event("0xa", EventKind::Revoked, 1, 0),
            event("0xa", EventKind::Added, 2, 0),
            event("0xb", EventKind::Added, 2, 1),
        ];
        let summary = engine.apply_batch(&events).await.unwrap();
        assert_eq!(summary, BatchSummary { projected: 2, duplicates: 0, rejected: 1 });
        assert_eq!(
            engine.aggregate("0xa").await.unwrap().unwrap().counters,
            Counters { added: 1, active: 1, removed: 0, revoked: 0 }
        );

        let again = engine.apply_batch(&events).await.unwrap();
        assert_eq!(again, BatchSummary { projected: 0, duplicates: 3, rejected: 0 });
    }

    #[tokio::test]
    async fn concurrent_applies_to_one_registry_serialize() {
        let (engine, store) = engine();
        let engine = Arc::new(engine);
        let mut handles = Vec::new();
        for i in 0..32u32 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                // same event delivered by many workers
                engine.apply(&event("0xr", EventKind::Added, 7, i % 4)).await
            }));
        }
        for h in handles {
            let _ = h.await.unwrap();
        }
        let state = engine.aggregate("0xr").await.unwrap().unwrap();
        assert!(state.counters.added <= 4);
        assert_eq!(state.version as usize, store.snapshot_count());
        assert!(state.counters.is_consistent());
    }
}
