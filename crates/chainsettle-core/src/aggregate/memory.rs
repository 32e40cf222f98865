//! In-memory aggregate store.
//!
//! All data is lost when the process exits. One mutex guards everything, so a
//! commit is trivially atomic.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::store::{AggregateCommit, AggregateStore, CommitOutcome, LoadedAggregate, SnapshotRange};
use super::types::{AggregateState, EventId, StatsSnapshot};
use crate::error::ProjectionError;

#[derive(Default)]
struct Inner {
    aggregates: HashMap<String, AggregateState>,
    snapshots: HashMap<String, Vec<StatsSnapshot>>,
    applied: HashSet<EventId>,
    rejected: HashMap<EventId, String>,
    claims: HashMap<String, String>,
}

#[derive(Default)]
pub struct MemoryAggregateStore {
    inner: Mutex<Inner>,
}

impl MemoryAggregateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total snapshots across all registries.
    pub fn snapshot_count(&self) -> usize {
        self.inner.lock().unwrap().snapshots.values().map(Vec::len).sum()
    }

    /// Why an event was refused, if it was.
    pub fn rejection(&self, event_id: &EventId) -> Option<String> {
        self.inner.lock().unwrap().rejected.get(event_id).cloned()
    }
}

#[async_trait]
impl AggregateStore for MemoryAggregateStore {
    async fn load(&self, registry_id: &str) -> Result<LoadedAggregate, ProjectionError> {
        Ok(match self.inner.lock().unwrap().aggregates.get(registry_id) {
            Some(state) => LoadedAggregate::Found(state.clone()),
            None => LoadedAggregate::NotFound,
        })
    }

    async fn is_applied(&self, event_id: &EventId) -> Result<bool, ProjectionError> {
        Ok(self.inner.lock().unwrap().applied.contains(event_id))
    }

    async fn commit(&self, commit: AggregateCommit) -> Result<CommitOutcome, ProjectionError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.applied.insert(commit.event_id) {
            return Ok(CommitOutcome::Duplicate);
        }
        let registry_id = commit.state.registry_id.clone();
        inner
            .snapshots
            .entry(registry_id.clone())
            .or_default()
            .push(commit.snapshot);
        inner.aggregates.insert(registry_id, commit.state);
        Ok(CommitOutcome::Committed)
    }

    async fn reject(&self, event_id: EventId, reason: &str) -> Result<CommitOutcome, ProjectionError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.applied.insert(event_id.clone()) {
            return Ok(CommitOutcome::Duplicate);
        }
        inner.rejected.insert(event_id, reason.to_string());
        Ok(CommitOutcome::Committed)
    }

    async fn link_claim(&self, signature_hash: &str, registry_id: &str) -> Result<(), ProjectionError> {
        self.inner
            .lock()
            .unwrap()
            .claims
            .insert(signature_hash.to_ascii_lowercase(), registry_id.to_string());
        Ok(())
    }

    async fn claim_registry(&self, signature_hash: &str) -> Result<Option<String>, ProjectionError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .claims
            .get(&signature_hash.to_ascii_lowercase())
            .cloned())
    }

    async fn snapshots(
        &self,
        registry_id: &str,
        range: SnapshotRange,
    ) -> Result<Vec<StatsSnapshot>, ProjectionError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .snapshots
            .get(registry_id)
            .map(|all| {
                all.iter()
                    .filter(|s| range.contains(s.timestamp))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
