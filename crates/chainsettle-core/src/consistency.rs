//! Consistency facade: the one call business code makes after a write.
//!
//! `await_write_visible(hashes)` = `await_receipts(hashes)` then
//! `await_indexed(max(block_number))`. On success every later read against
//! the indexer reflects the write.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::SettleConfig;
use crate::error::{SettleError, SubmissionError};
use crate::indexing::{IndexerStatus, IndexingWaiter};
use crate::receipt::{ReceiptSource, ReceiptWaiter};
use crate::types::{highest_block, TxHash};

/// Sends a write to the chain. Lives outside the facade; the facade only
/// waits on what a submitter returns.
#[async_trait]
pub trait TransactionSubmitter: Send + Sync {
    /// Whatever the chain needs to accept the write (e.g. signed raw txs).
    type Call: Send + Sync;

    async fn submit(&self, call: &Self::Call) -> Result<Vec<TxHash>, SubmissionError>;
}

/// Receipt waiter + indexing waiter, composed.
pub struct ConsistencyFacade {
    receipts: ReceiptWaiter,
    indexing: IndexingWaiter,
}

impl ConsistencyFacade {
    /// Build both waiters from injected clients and the configured tunables.
    pub fn new(
        chain: Arc<dyn ReceiptSource>,
        indexer: Arc<dyn IndexerStatus>,
        config: &SettleConfig,
    ) -> Result<Self, SettleError> {
        config.validate()?;
        Ok(Self {
            receipts: ReceiptWaiter::new(chain, config.receipt_policy()),
            indexing: IndexingWaiter::new(indexer, config.indexing_policy()),
        })
    }

    /// Wait until the write identified by `hashes` is confirmed on chain and
    /// projected by the indexer. Returns the indexed block observed.
    pub async fn await_write_visible(&self, hashes: &[TxHash]) -> Result<u64, SettleError> {
        let receipts = self.receipts.await_receipts(hashes).await?;
        let target = highest_block(&receipts).ok_or(SettleError::NoTransactions)?;
        let indexed = self.indexing.await_indexed(target).await?;
        info!(txs = receipts.len(), target, indexed, "write visible");
        Ok(indexed)
    }

    /// Submit through `submitter`, then wait for the write to become visible.
    pub async fn submit_and_await<S: TransactionSubmitter>(
        &self,
        submitter: &S,
        call: &S::Call,
    ) -> Result<u64, SettleError> {
        let hashes = submitter.submit(call).await?;
        self.await_write_visible(&hashes).await
    }
}
