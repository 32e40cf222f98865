//! Indexing waiter: polls the indexer's progress pointer until it reaches
//! the block of a confirmed write.

use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{FetchError, SettleError};
use crate::policy::{Attempt, Condition, PollError, PollPolicy};

/// Read access to the indexer's progress pointer.
///
/// Implementations must be side-effect free; many waiters may call this
/// concurrently against the same indexer.
#[async_trait]
pub trait IndexerStatus: Send + Sync {
    /// Highest block the indexer has fully projected.
    async fn indexed_block(&self) -> Result<u64, FetchError>;
}

/// Waits for the indexer to catch up to a target block.
pub struct IndexingWaiter {
    status: Arc<dyn IndexerStatus>,
    policy: PollPolicy,
}

impl IndexingWaiter {
    pub fn new(status: Arc<dyn IndexerStatus>, policy: PollPolicy) -> Self {
        Self { status, policy }
    }

    /// Poll until `indexed_block() >= target` and return the observed block,
    /// which may be past `target`.
    pub async fn await_indexed(&self, target: u64) -> Result<u64, SettleError> {
        let mut condition = IndexingCondition {
            status: self.status.as_ref(),
            target,
            last_seen: None,
            high_water: None,
        };

        match self.policy.run(&mut condition).await {
            Ok(block) => {
                debug!(target, indexed = block, "indexer caught up");
                Ok(block)
            }
            Err(PollError::Fatal(never)) => match never {},
            Err(PollError::DeadlineExceeded { elapsed, attempts }) => {
                debug!(target, attempts, last_seen = ?condition.last_seen, "indexing deadline exceeded");
                Err(SettleError::IndexingTimeout {
                    elapsed,
                    target,
                    last_seen: condition.last_seen,
                })
            }
        }
    }
}

struct IndexingCondition<'a> {
    status: &'a dyn IndexerStatus,
    target: u64,
    last_seen: Option<u64>,
    high_water: Option<u64>,
}

#[async_trait]
impl<'a> Condition for IndexingCondition<'a> {
    type Output = u64;
    type Error = Infallible;

    fn name(&self) -> &'static str {
        "indexing"
    }

    async fn attempt(&mut self) -> Attempt<u64, Infallible> {
        let block = match self.status.indexed_block().await {
            Ok(block) => block,
            Err(e) => return Attempt::Transient(e),
        };

        if let Some(high) = self.high_water {
            if block < high {
                warn!(observed = block, previous = high, "indexed block pointer went backwards");
            }
        }
        self.high_water = Some(self.high_water.map_or(block, |h| h.max(block)));
        self.last_seen = Some(block);

        if block >= self.target {
            Attempt::Ready(block)
        } else {
            Attempt::Pending
        }
    }
}
