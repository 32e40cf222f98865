//! Indexed block pointer: the highest block the projection has fully applied.
//!
//! The projection loop advances it after each batch; the indexing waiter reads
//! it through [`IndexerStatus`]. The pointer only ever moves forward.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{FetchError, ProjectionError};
use crate::indexing::IndexerStatus;

/// A persisted pointer position for one indexer instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Chain slug (e.g. `"ethereum"`).
    pub chain_id: String,
    /// Unique indexer identifier.
    pub indexer_id: String,
    /// Highest fully projected block.
    pub block_number: u64,
    /// Hash of that block.
    pub block_hash: String,
    /// Unix timestamp of when this checkpoint was saved.
    pub updated_at: i64,
}

/// Storage for pointer checkpoints.
///
/// `save` must never lower a stored `block_number`: a checkpoint at or below
/// the stored one is ignored.
#[async_trait]
pub trait PointerStore: Send + Sync {
    async fn load(
        &self,
        chain_id: &str,
        indexer_id: &str,
    ) -> Result<Option<Checkpoint>, ProjectionError>;

    /// Save a checkpoint if it moves the pointer forward. Returns whether it did.
    async fn save(&self, checkpoint: Checkpoint) -> Result<bool, ProjectionError>;
}

/// Monotonic pointer for one `(chain, indexer)` pair.
#[derive(Clone)]
pub struct BlockPointer {
    store: Arc<dyn PointerStore>,
    chain_id: String,
    indexer_id: String,
}

impl BlockPointer {
    pub fn new(
        store: Arc<dyn PointerStore>,
        chain_id: impl Into<String>,
        indexer_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            chain_id: chain_id.into(),
            indexer_id: indexer_id.into(),
        }
    }

    /// The last saved checkpoint (`None` if nothing has been projected).
    pub async fn load(&self) -> Result<Option<Checkpoint>, ProjectionError> {
        self.store.load(&self.chain_id, &self.indexer_id).await
    }

    /// Current pointer value; 0 before the first checkpoint.
    pub async fn current(&self) -> Result<u64, ProjectionError> {
        Ok(self.load().await?.map_or(0, |cp| cp.block_number))
    }

    /// Move the pointer to `block_number`. Returns `false` (and stores
    /// nothing) if that would not move it forward.
    pub async fn advance(&self, block_number: u64, block_hash: &str) -> Result<bool, ProjectionError> {
        let advanced = self
            .store
            .save(Checkpoint {
                chain_id: self.chain_id.clone(),
                indexer_id: self.indexer_id.clone(),
                block_number,
                block_hash: block_hash.to_string(),
                updated_at: chrono::Utc::now().timestamp(),
            })
            .await?;
        if !advanced {
            tracing::debug!(block_number, "pointer not advanced (already at or past block)");
        }
        Ok(advanced)
    }
}

#[async_trait]
impl IndexerStatus for BlockPointer {
    async fn indexed_block(&self) -> Result<u64, FetchError> {
        self.current()
            .await
            .map_err(|e| FetchError::Unavailable(e.to_string()))
    }
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

/// In-memory pointer store for tests and ephemeral indexers.
#[derive(Default)]
pub struct MemoryPointerStore {
    data: Mutex<HashMap<String, Checkpoint>>,
}

impl MemoryPointerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(chain_id: &str, indexer_id: &str) -> String {
        format!("{chain_id}:{indexer_id}")
    }
}

#[async_trait]
impl PointerStore for MemoryPointerStore {
    async fn load(
        &self,
        chain_id: &str,
        indexer_id: &str,
    ) -> Result<Option<Checkpoint>, ProjectionError> {
        Ok(self.data.lock().unwrap().get(&Self::key(chain_id, indexer_id)).cloned())
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<bool, ProjectionError> {
        let key = Self::key(&checkpoint.chain_id, &checkpoint.indexer_id);
        let mut data = self.data.lock().unwrap();
        if let Some(existing) = data.get(&key) {
            if checkpoint.block_number <= existing.block_number {
                return Ok(false);
            }
        }
        data.insert(key, checkpoint);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pointer() -> BlockPointer {
        BlockPointer::new(Arc::new(MemoryPointerStore::new()), "ethereum", "registries")
    }

    #[tokio::test]
    async fn starts_at_zero() {
        let p = pointer();
        assert!(p.load().await.unwrap().is_none());
        assert_eq!(p.indexed_block().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn advance_is_monotonic() {
        let p = pointer();
        assert!(p.advance(100, "0xa").await.unwrap());
        assert!(!p.advance(90, "0xb").await.unwrap());
        assert!(!p.advance(100, "0xc").await.unwrap());
        assert_eq!(p.current().await.unwrap(), 100);
        assert_eq!(p.load().await.unwrap().unwrap().block_hash, "0xa");

        assert!(p.advance(101, "0xd").await.unwrap());
        assert_eq!(p.indexed_block().await.unwrap(), 101);
    }

    #[tokio::test]
    async fn successive_reads_never_decrease() {
        let p = pointer();
        let mut last = 0;
        for block in [5u64, 3, 9, 9, 2, 14, 11] {
            p.advance(block, "0x").await.unwrap();
            let seen = p.indexed_block().await.unwrap();
            assert!(seen >= last, "pointer went from {last} to {seen}");
            last = seen;
        }
        assert_eq!(last, 14);
    }

    #[tokio::test]
    async fn pointers_are_scoped_per_indexer() {
        let store: Arc<dyn PointerStore> = Arc::new(MemoryPointerStore::new());
        let a = BlockPointer::new(store.clone(), "ethereum", "a");
        let b = BlockPointer::new(store.clone(), "ethereum", "b");
        a.advance(50, "0x").await.unwrap();
        assert_eq!(b.current().await.unwrap(), 0);
        assert_eq!(a.current().await.unwrap(), 50);
    }

    #[tokio::test]
    async fn store_refuses_to_lower_a_saved_pointer() {
        let store = MemoryPointerStore::new();
        let at = |block| Checkpoint {
            chain_id: "ethereum".into(),
            indexer_id: "registries".into(),
            block_number: block,
            block_hash: format!("0x{block:x}"),
            updated_at: 0,
        };
        assert!(store.save(at(20)).await.unwrap());
        assert!(!store.save(at(0)).await.unwrap());
        let saved = store.load("ethereum", "registries").await.unwrap().unwrap();
        assert_eq!(saved.block_number, 20);
    }
}
